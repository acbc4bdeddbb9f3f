//! Room/occupant assignment.
//!
//! `rooms.occupant_id` is the only record of who lives where. Every workflow
//! here commits as one transaction over the rooms table, so an occupant is
//! never left in two rooms.

use serde::{Deserialize, Serialize};

use crate::error::{PortalError, Result};
use crate::models::{Occupant, Room, RoomStatus};
use crate::storage::Storage;

/// What an assignment did besides filling the target room.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AssignOutcome {
    /// Occupant that held the target room before and is now unassigned.
    pub displaced: Option<u64>,
    /// Other room the occupant was released from.
    pub released_room: Option<u64>,
}

fn occupy(room: &mut Room, occupant_id: u64) {
    room.occupant_id = Some(occupant_id);
    room.status = RoomStatus::Occupied;
}

fn vacate(room: &mut Room) {
    room.occupant_id = None;
    room.status = RoomStatus::Available;
}

fn require_occupant(storage: &Storage, occupant_id: u64) -> Result<Occupant> {
    storage
        .get_occupant(occupant_id)?
        .ok_or_else(|| PortalError::not_found("occupant", occupant_id))
}

/// Put `occupant_id` into `room_id`, overwriting whoever was there.
pub fn assign(storage: &Storage, room_id: u64, occupant_id: u64) -> Result<(Room, AssignOutcome)> {
    require_occupant(storage, occupant_id)?;

    let (room, outcome) = storage.transact_rooms(|tx| {
        let mut room = tx.get(room_id)?;
        let mut outcome = AssignOutcome {
            displaced: room.occupant_id.filter(|&o| o != occupant_id),
            released_room: None,
        };

        if let Some(held) = tx.room_of(occupant_id)? {
            if held != room_id {
                let mut previous = tx.get(held)?;
                vacate(&mut previous);
                tx.put(&previous)?;
                outcome.released_room = Some(held);
            }
        }

        occupy(&mut room, occupant_id);
        tx.put(&room)?;
        Ok((room, outcome))
    })?;

    if let Some(displaced) = outcome.displaced {
        tracing::info!(room_id, displaced, "room reassigned, previous occupant unassigned");
    }
    tracing::info!(room_id, occupant_id, released = ?outcome.released_room, "occupant assigned");
    Ok((room, outcome))
}

/// Move an occupant from `from_room_id` to `to_room_id`. The target is not
/// checked for vacancy; a previous occupant there becomes unassigned.
pub fn move_occupant(
    storage: &Storage,
    occupant_id: u64,
    from_room_id: u64,
    to_room_id: u64,
) -> Result<(Room, Room, AssignOutcome)> {
    if from_room_id == to_room_id {
        return Err(PortalError::Validation(
            "target room is the occupant's current room".into(),
        ));
    }
    require_occupant(storage, occupant_id)?;

    let (source, target, outcome) = storage.transact_rooms(|tx| {
        let mut source = tx.get(from_room_id)?;
        let mut target = tx.get(to_room_id)?;

        if source.occupant_id != Some(occupant_id) {
            return Err(sled::transaction::ConflictableTransactionError::Abort(
                PortalError::Conflict(format!(
                    "occupant {} is not in room {}",
                    occupant_id, from_room_id
                )),
            ));
        }

        let outcome = AssignOutcome {
            displaced: target.occupant_id.filter(|&o| o != occupant_id),
            released_room: Some(from_room_id),
        };

        // Clear the source first so the index ends pointing at the target.
        vacate(&mut source);
        tx.put(&source)?;
        occupy(&mut target, occupant_id);
        tx.put(&target)?;
        Ok((source, target, outcome))
    })?;

    if let Some(displaced) = outcome.displaced {
        tracing::info!(room_id = to_room_id, displaced, "move displaced previous occupant");
    }
    tracing::info!(occupant_id, from_room_id, to_room_id, "occupant moved");
    Ok((source, target, outcome))
}

/// Clear a room's occupant and mark it available.
pub fn remove(storage: &Storage, room_id: u64) -> Result<Room> {
    let room = storage.transact_rooms(|tx| {
        let mut room = tx.get(room_id)?;
        vacate(&mut room);
        tx.put(&room)?;
        Ok(room)
    })?;
    tracing::info!(room_id, "occupant removed from room");
    Ok(room)
}

/// Occupants not referenced by any room.
pub fn available_occupants(storage: &Storage) -> Result<Vec<Occupant>> {
    let mut available = vec![];
    for occupant in storage.list_occupants()? {
        if storage.room_of(occupant.id)?.is_none() {
            available.push(occupant);
        }
    }
    Ok(available)
}

/// Destinations offered for a move: every room except the current one.
pub fn move_candidates(storage: &Storage, from_room_id: u64) -> Result<Vec<Room>> {
    Ok(storage
        .list_rooms()?
        .into_iter()
        .filter(|r| r.id != from_room_id)
        .collect())
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RoomFilter {
    pub search: Option<String>,
    pub status: Option<RoomStatus>,
}

#[derive(Serialize, Debug, Clone)]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    pub occupant: Option<Occupant>,
}

/// Rooms matching the filter (search on number or building), with occupants joined.
pub fn list_rooms(storage: &Storage, filter: &RoomFilter) -> Result<Vec<RoomView>> {
    let needle = filter.search.as_deref().map(str::to_lowercase).unwrap_or_default();
    let mut views = vec![];
    for room in storage.list_rooms()? {
        let matches_search = room.room_number.to_lowercase().contains(&needle)
            || room.building.to_lowercase().contains(&needle);
        let matches_status = filter.status.map_or(true, |s| room.status == s);
        if !(matches_search && matches_status) {
            continue;
        }
        let occupant = match room.occupant_id {
            Some(id) => storage.get_occupant(id)?,
            None => None,
        };
        views.push(RoomView { room, occupant });
    }
    Ok(views)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub id: u64,
    pub room_number: String,
    pub building: String,
    pub monthly_rent: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct OccupantView {
    #[serde(flatten)]
    pub occupant: Occupant,
    pub room: Option<RoomSummary>,
}

pub fn current_room(storage: &Storage, occupant_id: u64) -> Result<Option<Room>> {
    match storage.room_of(occupant_id)? {
        Some(room_id) => storage.get_room(room_id),
        None => Ok(None),
    }
}

/// Occupants ordered by last name, searched on first/last name and email.
pub fn list_occupants(storage: &Storage, search: Option<&str>) -> Result<Vec<OccupantView>> {
    let needle = search.map(str::to_lowercase).unwrap_or_default();
    let mut occupants: Vec<Occupant> = storage
        .list_occupants()?
        .into_iter()
        .filter(|o| {
            o.first_name.to_lowercase().contains(&needle)
                || o.last_name.to_lowercase().contains(&needle)
                || o.email.to_lowercase().contains(&needle)
        })
        .collect();
    occupants.sort_by(|a, b| a.last_name.cmp(&b.last_name));

    let mut views = vec![];
    for occupant in occupants {
        let room = current_room(storage, occupant.id)?.map(|r| RoomSummary {
            id: r.id,
            room_number: r.room_number,
            building: r.building,
            monthly_rent: r.monthly_rent,
        });
        views.push(OccupantView { occupant, room });
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOccupant, NewRoom};

    fn seed(storage: &Storage) -> (Room, Room, Occupant, Occupant) {
        let a = storage
            .insert_room(NewRoom {
                room_number: "101".into(),
                building: "North".into(),
                capacity: 1,
                monthly_rent: 3500.0,
            })
            .unwrap();
        let b = storage
            .insert_room(NewRoom {
                room_number: "102".into(),
                building: "North".into(),
                capacity: 1,
                monthly_rent: 2500.0,
            })
            .unwrap();
        let ana = storage
            .insert_occupant(NewOccupant {
                first_name: "Ana".into(),
                last_name: "Cruz".into(),
                email: "ana@m2h.test".into(),
            })
            .unwrap();
        let ben = storage
            .insert_occupant(NewOccupant {
                first_name: "Ben".into(),
                last_name: "Abad".into(),
                email: "ben@m2h.test".into(),
            })
            .unwrap();
        (a, b, ana, ben)
    }

    #[test]
    fn test_remove_clears_occupied_room() {
        let storage = Storage::open_temporary().unwrap();
        let (a, _, ana, _) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        let room = remove(&storage, a.id).unwrap();
        assert_eq!(room.occupant_id, None);
        assert_eq!(room.status, RoomStatus::Available);
        assert_eq!(storage.room_of(ana.id).unwrap(), None);
    }

    #[test]
    fn test_move_there_and_back_restores() {
        let storage = Storage::open_temporary().unwrap();
        let (a, b, ana, _) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        move_occupant(&storage, ana.id, a.id, b.id).unwrap();
        let (back_a, back_b) = (storage.get_room(a.id).unwrap().unwrap(), storage.get_room(b.id).unwrap().unwrap());
        assert_eq!(back_a.occupant_id, None);
        assert_eq!(back_b.occupant_id, Some(ana.id));

        move_occupant(&storage, ana.id, b.id, a.id).unwrap();
        let a_now = storage.get_room(a.id).unwrap().unwrap();
        let b_now = storage.get_room(b.id).unwrap().unwrap();
        assert_eq!(a_now.occupant_id, Some(ana.id));
        assert_eq!(a_now.status, RoomStatus::Occupied);
        assert_eq!(b_now.occupant_id, None);
        assert_eq!(b_now.status, RoomStatus::Available);
        assert_eq!(storage.room_of(ana.id).unwrap(), Some(a.id));
    }

    #[test]
    fn test_assign_overwrites_and_releases() {
        let storage = Storage::open_temporary().unwrap();
        let (a, b, ana, ben) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        let (_, outcome) = assign(&storage, a.id, ben.id).unwrap();
        assert_eq!(outcome.displaced, Some(ana.id));
        assert_eq!(storage.room_of(ana.id).unwrap(), None);

        // Assigning Ben elsewhere releases room A instead of holding two rooms.
        let (_, outcome) = assign(&storage, b.id, ben.id).unwrap();
        assert_eq!(outcome.released_room, Some(a.id));
        let a_now = storage.get_room(a.id).unwrap().unwrap();
        assert_eq!(a_now.occupant_id, None);
        assert_eq!(a_now.status, RoomStatus::Available);
    }

    #[test]
    fn test_move_rejects_stale_source_and_leaves_rooms_untouched() {
        let storage = Storage::open_temporary().unwrap();
        let (a, b, ana, ben) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        let err = move_occupant(&storage, ben.id, a.id, b.id).unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
        assert_eq!(storage.get_room(a.id).unwrap().unwrap().occupant_id, Some(ana.id));
        assert_eq!(storage.get_room(b.id).unwrap().unwrap().occupant_id, None);

        assert!(matches!(
            move_occupant(&storage, ana.id, a.id, 9999),
            Err(PortalError::NotFound { .. })
        ));
        assert!(matches!(
            move_occupant(&storage, ana.id, a.id, a.id),
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            assign(&storage, b.id, 9999),
            Err(PortalError::NotFound { .. })
        ));
    }

    #[test]
    fn test_candidates_and_available() {
        let storage = Storage::open_temporary().unwrap();
        let (a, b, ana, ben) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        let available: Vec<u64> = available_occupants(&storage).unwrap().iter().map(|o| o.id).collect();
        assert_eq!(available, vec![ben.id]);

        let candidates: Vec<u64> = move_candidates(&storage, a.id).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(candidates, vec![b.id]);
    }

    #[test]
    fn test_listing_filters_and_joins() {
        let storage = Storage::open_temporary().unwrap();
        let (a, _, ana, _) = seed(&storage);
        assign(&storage, a.id, ana.id).unwrap();

        let occupied = list_rooms(
            &storage,
            &RoomFilter {
                search: Some("NORTH".into()),
                status: Some(RoomStatus::Occupied),
            },
        )
        .unwrap();
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].occupant.as_ref().map(|o| o.id), Some(ana.id));

        let occupants = list_occupants(&storage, None).unwrap();
        assert_eq!(occupants[0].occupant.last_name, "Abad");
        assert_eq!(occupants[1].room.as_ref().map(|r| r.id), Some(a.id));

        let found = list_occupants(&storage, Some("CRUZ")).unwrap();
        assert_eq!(found.len(), 1);
    }
}
