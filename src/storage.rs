//! Backend gateway: auth primitives and typed table access over Sled.
//!
//! One tree per table (`users`, `occupants`, `rooms`, `reports`,
//! `profiles`), plus `identities`/`sessions` for authentication and two
//! secondary indexes (`occupant_emails`, `room_by_occupant`). Values are
//! JSON-encoded rows; numeric keys are big-endian so scans come back in id
//! order.

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::error::{PortalError, Result};
use crate::models::{
    Identity, NewOccupant, NewReport, NewRoom, Occupant, Profile, Report, ReportStatus, Room,
    RoomStatus, User,
};

#[derive(Clone)] // Sled handles are cheap to clone and thread-safe
pub struct Storage {
    db: Db,
    identities: Tree,
    identity_emails: Tree,
    sessions: Tree,
    users: Tree,
    occupants: Tree,
    occupant_emails: Tree,
    rooms: Tree,
    room_by_occupant: Tree,
    reports: Tree,
    profiles: Tree,
}

/// Row in `sessions`: whose session it is and when its token stops being valid.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct SessionRow {
    identity_id: Uuid,
    expires_at: i64,
}

impl SessionRow {
    fn live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn put<T: Serialize>(tree: &Tree, key: impl AsRef<[u8]>, row: &T) -> Result<()> {
    tree.insert(key.as_ref(), serde_json::to_vec(row)?)?;
    Ok(())
}

fn fetch<T: DeserializeOwned>(tree: &Tree, key: impl AsRef<[u8]>) -> Result<Option<T>> {
    match tree.get(key.as_ref())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    let mut rows = vec![];
    for item in tree.iter() {
        let (_, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}

fn id_from_bytes(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

fn abort<T>(err: PortalError) -> ConflictableTransactionResult<T, PortalError> {
    Err(ConflictableTransactionError::Abort(err))
}

impl Storage {
    /// Open or create the Sled database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database, removed when dropped.
    pub fn open_temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            identities: db.open_tree("identities")?,
            identity_emails: db.open_tree("identity_emails")?,
            sessions: db.open_tree("sessions")?,
            users: db.open_tree("users")?,
            occupants: db.open_tree("occupants")?,
            occupant_emails: db.open_tree("occupant_emails")?,
            rooms: db.open_tree("rooms")?,
            room_by_occupant: db.open_tree("room_by_occupant")?,
            reports: db.open_tree("reports")?,
            profiles: db.open_tree("profiles")?,
            db,
        })
    }

    /// Ids start at 1 so that 0 never appears as a row reference.
    fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Auth primitives ---

    pub fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: hash_password(password)?,
        };
        let claimed = self.identity_emails.compare_and_swap(
            email.as_bytes(),
            None as Option<&[u8]>,
            Some(identity.id.as_bytes().as_slice()),
        )?;
        if claimed.is_err() {
            return Err(PortalError::Conflict("User already registered".into()));
        }
        put(&self.identities, identity.id.as_bytes(), &identity)?;
        tracing::debug!(identity = %identity.id, "identity created");
        Ok(identity)
    }

    pub fn delete_identity(&self, id: Uuid) -> Result<()> {
        if let Some(identity) = fetch::<Identity>(&self.identities, id.as_bytes())? {
            self.identity_emails.remove(identity.email.as_bytes())?;
        }
        self.identities.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        fetch(&self.identities, id.as_bytes())
    }

    pub fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        match self.identity_emails.get(normalize_email(email).as_bytes())? {
            Some(raw) => {
                let id = Uuid::from_slice(&raw)
                    .map_err(|e| PortalError::Storage(format!("bad identity index: {}", e)))?;
                self.get_identity(id)
            }
            None => Ok(None),
        }
    }

    /// Checks the password and opens a backend session lasting `ttl_secs`.
    /// Expired sessions are pruned on the way.
    pub fn sign_in(&self, email: &str, password: &str, ttl_secs: u64) -> Result<(Identity, Uuid)> {
        let identity = self
            .find_identity_by_email(email)?
            .ok_or(PortalError::InvalidCredentials)?;
        if !verify_password(password, &identity.password_hash)? {
            return Err(PortalError::InvalidCredentials);
        }
        let now = Utc::now().timestamp();
        self.prune_sessions(now)?;

        let sid = Uuid::new_v4();
        let row = SessionRow {
            identity_id: identity.id,
            expires_at: now.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
        };
        put(&self.sessions, sid.as_bytes(), &row)?;
        Ok((identity, sid))
    }

    fn prune_sessions(&self, now: i64) -> Result<usize> {
        let mut pruned = 0;
        for item in self.sessions.iter() {
            let (key, value) = item?;
            // Unreadable rows count as expired.
            let live = serde_json::from_slice::<SessionRow>(&value).is_ok_and(|row| row.live(now));
            if !live {
                self.sessions.remove(key)?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "expired sessions removed");
        }
        Ok(pruned)
    }

    pub fn session_active(&self, sid: Uuid) -> Result<bool> {
        let row = match self.sessions.get(sid.as_bytes())? {
            Some(raw) => serde_json::from_slice::<SessionRow>(&raw).ok(),
            None => None,
        };
        Ok(row.is_some_and(|row| row.live(Utc::now().timestamp())))
    }

    pub fn sign_out(&self, sid: Uuid) -> Result<()> {
        self.sessions.remove(sid.as_bytes())?;
        Ok(())
    }

    /// Close every session of `identity_id` except `keep`.
    pub fn close_sessions(&self, identity_id: Uuid, keep: Option<Uuid>) -> Result<usize> {
        let mut closed = 0;
        for item in self.sessions.iter() {
            let (key, value) = item?;
            let Ok(row) = serde_json::from_slice::<SessionRow>(&value) else {
                continue;
            };
            if row.identity_id == identity_id && keep.map_or(true, |k| k.as_bytes()[..] != key[..]) {
                self.sessions.remove(key)?;
                closed += 1;
            }
        }
        Ok(closed)
    }

    pub fn update_password(&self, id: Uuid, password: &str) -> Result<()> {
        let mut identity = self
            .get_identity(id)?
            .ok_or_else(|| PortalError::not_found("identity", id))?;
        identity.password_hash = hash_password(password)?;
        put(&self.identities, id.as_bytes(), &identity)
    }

    // --- users ---

    pub fn insert_user(&self, user: &User) -> Result<()> {
        let bytes = serde_json::to_vec(user)?;
        let inserted = self.users.compare_and_swap(
            user.id.as_bytes(),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        inserted.map_err(|_| PortalError::Conflict(format!("user {} already exists", user.id)))
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        fetch(&self.users, id.as_bytes())
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self.list_users()?.into_iter().find(|u| u.email == email))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        scan(&self.users)
    }

    // --- occupants ---

    /// Inserts an occupant; the email is unique across the table.
    pub fn insert_occupant(&self, new: NewOccupant) -> Result<Occupant> {
        let occupant = Occupant {
            id: self.next_id()?,
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            email: normalize_email(&new.email),
        };
        let claimed = self.occupant_emails.compare_and_swap(
            occupant.email.as_bytes(),
            None as Option<&[u8]>,
            Some(&occupant.id.to_be_bytes()[..]),
        )?;
        if claimed.is_err() {
            return Err(PortalError::Conflict(format!(
                "occupant email {} already exists",
                occupant.email
            )));
        }
        put(&self.occupants, occupant.id.to_be_bytes(), &occupant)?;
        Ok(occupant)
    }

    pub fn delete_occupant(&self, id: u64) -> Result<()> {
        if let Some(occupant) = self.get_occupant(id)? {
            self.occupant_emails.remove(occupant.email.as_bytes())?;
        }
        self.occupants.remove(id.to_be_bytes())?;
        Ok(())
    }

    pub fn get_occupant(&self, id: u64) -> Result<Option<Occupant>> {
        fetch(&self.occupants, id.to_be_bytes())
    }

    pub fn list_occupants(&self) -> Result<Vec<Occupant>> {
        scan(&self.occupants)
    }

    // --- rooms ---

    pub fn insert_room(&self, new: NewRoom) -> Result<Room> {
        let room = Room {
            id: self.next_id()?,
            room_number: new.room_number.trim().to_string(),
            building: new.building.trim().to_string(),
            status: RoomStatus::Available,
            occupant_id: None,
            capacity: new.capacity,
            monthly_rent: new.monthly_rent,
        };
        put(&self.rooms, room.id.to_be_bytes(), &room)?;
        Ok(room)
    }

    pub fn get_room(&self, id: u64) -> Result<Option<Room>> {
        fetch(&self.rooms, id.to_be_bytes())
    }

    /// All rooms ordered by room number.
    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        let mut rooms: Vec<Room> = scan(&self.rooms)?;
        rooms.sort_by(|a, b| a.room_number.cmp(&b.room_number).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    /// Room currently holding the occupant, if any.
    pub fn room_of(&self, occupant_id: u64) -> Result<Option<u64>> {
        Ok(self
            .room_by_occupant
            .get(occupant_id.to_be_bytes())?
            .and_then(|raw| id_from_bytes(&raw)))
    }

    /// Runs `f` as one atomic transaction over the rooms table and its
    /// occupant index. Sled may re-run `f` on conflict.
    pub fn transact_rooms<R, F>(&self, f: F) -> Result<R>
    where
        F: Fn(&RoomTx<'_>) -> ConflictableTransactionResult<R, PortalError>,
    {
        (&self.rooms, &self.room_by_occupant)
            .transaction(|(rooms, index)| f(&RoomTx { rooms, index }))
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => err.into(),
            })
    }

    // --- reports ---

    pub fn insert_report(&self, new: NewReport) -> Result<Report> {
        let report = Report {
            id: self.next_id()?,
            title: new.title,
            description: new.description,
            status: ReportStatus::Open,
            reporter_id: new.reporter_id,
            room_id: new.room_id,
            created_at: Utc::now(),
        };
        put(&self.reports, report.id.to_be_bytes(), &report)?;
        Ok(report)
    }

    pub fn get_report(&self, id: u64) -> Result<Option<Report>> {
        fetch(&self.reports, id.to_be_bytes())
    }

    pub fn list_reports(&self) -> Result<Vec<Report>> {
        scan(&self.reports)
    }

    pub fn set_report_status(&self, id: u64, status: ReportStatus) -> Result<Report> {
        let mut report = self
            .get_report(id)?
            .ok_or_else(|| PortalError::not_found("report", id))?;
        report.status = status;
        put(&self.reports, id.to_be_bytes(), &report)?;
        Ok(report)
    }

    // --- profiles ---

    pub fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        fetch(&self.profiles, user_id.as_bytes())
    }

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        put(&self.profiles, profile.user_id.as_bytes(), profile)
    }
}

/// Transactional view over `rooms` and `room_by_occupant`. `put` keeps the
/// index in step with each room's `occupant_id`.
pub struct RoomTx<'a> {
    rooms: &'a TransactionalTree,
    index: &'a TransactionalTree,
}

impl RoomTx<'_> {
    pub fn get(&self, id: u64) -> ConflictableTransactionResult<Room, PortalError> {
        match self.find(id)? {
            Some(room) => Ok(room),
            None => abort(PortalError::not_found("room", id)),
        }
    }

    fn find(&self, id: u64) -> ConflictableTransactionResult<Option<Room>, PortalError> {
        match self.rooms.get(id.to_be_bytes())? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(room) => Ok(Some(room)),
                Err(e) => abort(e.into()),
            },
            None => Ok(None),
        }
    }

    pub fn room_of(&self, occupant_id: u64) -> ConflictableTransactionResult<Option<u64>, PortalError> {
        Ok(self
            .index
            .get(occupant_id.to_be_bytes())?
            .and_then(|raw| id_from_bytes(&raw)))
    }

    pub fn put(&self, room: &Room) -> ConflictableTransactionResult<(), PortalError> {
        let previous = self.find(room.id)?.and_then(|r| r.occupant_id);
        if let Some(prev) = previous {
            if Some(prev) != room.occupant_id && self.room_of(prev)? == Some(room.id) {
                self.index.remove(&prev.to_be_bytes()[..])?;
            }
        }
        if let Some(occupant) = room.occupant_id {
            self.index
                .insert(&occupant.to_be_bytes()[..], &room.id.to_be_bytes()[..])?;
        }
        let bytes = match serde_json::to_vec(room) {
            Ok(b) => b,
            Err(e) => return abort(e.into()),
        };
        self.rooms.insert(&room.id.to_be_bytes()[..], bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_room(number: &str) -> NewRoom {
        NewRoom {
            room_number: number.into(),
            building: "North".into(),
            capacity: 1,
            monthly_rent: 3500.0,
        }
    }

    #[test]
    fn test_sign_up_sign_in_sign_out() {
        let storage = Storage::open_temporary().unwrap();
        let identity = storage.sign_up(" Ana@M2H.test ", "hunter22").unwrap();
        assert_eq!(identity.email, "ana@m2h.test");

        assert!(matches!(
            storage.sign_up("ana@m2h.test", "other"),
            Err(PortalError::Conflict(_))
        ));
        assert!(matches!(
            storage.sign_in("ana@m2h.test", "wrong", 60),
            Err(PortalError::InvalidCredentials)
        ));

        let (signed_in, sid) = storage.sign_in("ANA@m2h.test", "hunter22", 60).unwrap();
        assert_eq!(signed_in.id, identity.id);
        assert!(storage.session_active(sid).unwrap());
        storage.sign_out(sid).unwrap();
        assert!(!storage.session_active(sid).unwrap());

        storage.update_password(identity.id, "newpass1").unwrap();
        assert!(storage.sign_in("ana@m2h.test", "newpass1", 60).is_ok());
    }

    #[test]
    fn test_expired_sessions_are_inactive_and_pruned() {
        let storage = Storage::open_temporary().unwrap();
        storage.sign_up("ana@m2h.test", "hunter22").unwrap();

        let (_, stale) = storage.sign_in("ana@m2h.test", "hunter22", 0).unwrap();
        assert!(!storage.session_active(stale).unwrap());
        assert_eq!(storage.sessions.len(), 1);

        let (_, fresh) = storage.sign_in("ana@m2h.test", "hunter22", 60).unwrap();
        assert!(storage.session_active(fresh).unwrap());
        assert_eq!(storage.sessions.len(), 1);
        assert!(!storage.sessions.contains_key(stale.as_bytes()).unwrap());
    }

    #[test]
    fn test_close_sessions_keeps_current() {
        let storage = Storage::open_temporary().unwrap();
        storage.sign_up("ana@m2h.test", "hunter22").unwrap();
        storage.sign_up("ben@m2h.test", "hunter22").unwrap();
        let (ana, current) = storage.sign_in("ana@m2h.test", "hunter22", 60).unwrap();
        let (_, other) = storage.sign_in("ana@m2h.test", "hunter22", 60).unwrap();
        let (_, ben) = storage.sign_in("ben@m2h.test", "hunter22", 60).unwrap();

        assert_eq!(storage.close_sessions(ana.id, Some(current)).unwrap(), 1);
        assert!(storage.session_active(current).unwrap());
        assert!(!storage.session_active(other).unwrap());
        assert!(storage.session_active(ben).unwrap());
    }

    #[test]
    fn test_room_tx_put_indexes_new_room() {
        let storage = Storage::open_temporary().unwrap();
        let room = Room {
            id: 42,
            room_number: "301".into(),
            building: "East".into(),
            status: RoomStatus::Occupied,
            occupant_id: Some(7),
            capacity: 1,
            monthly_rent: 0.0,
        };
        storage.transact_rooms(|tx| tx.put(&room)).unwrap();
        assert_eq!(storage.room_of(7).unwrap(), Some(42));

        let mut vacated = room.clone();
        vacated.occupant_id = None;
        vacated.status = RoomStatus::Available;
        storage.transact_rooms(|tx| tx.put(&vacated)).unwrap();
        assert_eq!(storage.room_of(7).unwrap(), None);
    }

    #[test]
    fn test_occupant_email_is_unique_and_freed_on_delete() {
        let storage = Storage::open_temporary().unwrap();
        let new = NewOccupant {
            first_name: " Ana ".into(),
            last_name: "Cruz".into(),
            email: "Ana@m2h.test".into(),
        };
        let occupant = storage.insert_occupant(new.clone()).unwrap();
        assert_eq!(occupant.first_name, "Ana");
        assert!(occupant.id >= 1);
        assert!(matches!(
            storage.insert_occupant(new.clone()),
            Err(PortalError::Conflict(_))
        ));

        storage.delete_occupant(occupant.id).unwrap();
        assert!(storage.get_occupant(occupant.id).unwrap().is_none());
        assert!(storage.insert_occupant(new).is_ok());
    }

    #[test]
    fn test_room_transaction_keeps_index_and_aborts_cleanly() {
        let storage = Storage::open_temporary().unwrap();
        let room = storage.insert_room(new_room("101")).unwrap();

        storage
            .transact_rooms(|tx| {
                let mut r = tx.get(room.id)?;
                r.occupant_id = Some(9);
                r.status = RoomStatus::Occupied;
                tx.put(&r)
            })
            .unwrap();
        assert_eq!(storage.room_of(9).unwrap(), Some(room.id));

        // Aborting after a write leaves nothing behind.
        let err = storage
            .transact_rooms(|tx| {
                let mut r = tx.get(room.id)?;
                r.occupant_id = None;
                tx.put(&r)?;
                tx.get(9999).map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound { .. }));
        assert_eq!(storage.get_room(room.id).unwrap().unwrap().occupant_id, Some(9));
        assert_eq!(storage.room_of(9).unwrap(), Some(room.id));
    }

    #[test]
    fn test_rooms_listed_by_number() {
        let storage = Storage::open_temporary().unwrap();
        storage.insert_room(new_room("B-201")).unwrap();
        storage.insert_room(new_room("A-101")).unwrap();
        let numbers: Vec<String> = storage
            .list_rooms()
            .unwrap()
            .into_iter()
            .map(|r| r.room_number)
            .collect();
        assert_eq!(numbers, vec!["A-101", "B-201"]);
    }

    #[test]
    fn test_report_status_update() {
        let storage = Storage::open_temporary().unwrap();
        let report = storage
            .insert_report(NewReport {
                title: "Leak".into(),
                description: "Ceiling".into(),
                reporter_id: None,
                room_id: None,
            })
            .unwrap();
        assert_eq!(report.status, ReportStatus::Open);
        let updated = storage
            .set_report_status(report.id, ReportStatus::Resolved)
            .unwrap();
        assert_eq!(updated.status, ReportStatus::Resolved);
        assert!(matches!(
            storage.set_report_status(4242, ReportStatus::Open),
            Err(PortalError::NotFound { .. })
        ));
    }
}
