use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Portal roles. Closed set: any other stored value means "no role".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "SA")]
    StudentAffairs,
    #[serde(rename = "treasurer")]
    Treasurer,
    #[serde(rename = "occupant")]
    Occupant,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Admin,
        Role::StudentAffairs,
        Role::Treasurer,
        Role::Occupant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::StudentAffairs => "SA",
            Role::Treasurer => "treasurer",
            Role::Occupant => "occupant",
        }
    }

    /// Exact, case-sensitive match against the stored names.
    pub fn parse(value: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads a role column, mapping unknown strings to `None` instead of failing the row.
fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Role::parse))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid, // identity id
    pub email: String,
    #[serde(deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    pub occupant_id: Option<u64>,
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Occupant {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Occupant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewOccupant {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
    Reserved,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Room {
    pub id: u64,
    pub room_number: String,
    pub building: String,
    pub status: RoomStatus,
    pub occupant_id: Option<u64>,
    pub capacity: u32,
    pub monthly_rent: f64,
}

impl Room {
    /// "building room_number", the label reports are searched by.
    pub fn label(&self) -> String {
        format!("{} {}", self.building, self.room_number)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewRoom {
    pub room_number: String,
    pub building: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub monthly_rent: f64,
}

fn default_capacity() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    InProgress,
    Resolved,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Report {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: ReportStatus,
    pub reporter_id: Option<u64>,
    pub room_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub reporter_id: Option<u64>,
    pub room_id: Option<u64>,
}

/// Auth identity held by the backend (the users row references it by id).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: Uuid,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

fn default_notifications() -> bool {
    true
}

impl Profile {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            full_name: String::new(),
            phone: String::new(),
            notifications: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: Uuid,    // identity id
    pub email: String,
    pub role: Option<Role>,
    pub sid: Uuid,    // backend session, revoked on sign-out
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names_and_parse() {
        assert_eq!(Role::parse("SA"), Some(Role::StudentAffairs));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("Admin"), None);
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(
            serde_json::to_string(&Role::StudentAffairs).unwrap(),
            "\"SA\""
        );
    }

    #[test]
    fn test_unknown_stored_role_reads_as_none() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "email": "x@y.io",
            "role": "janitor",
            "occupant_id": null,
            "status": "active",
        });
        let user: User = serde_json::from_value(raw).unwrap();
        assert!(user.role.is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let s: RoomStatus = serde_json::from_str("\"maintenance\"").unwrap();
        assert_eq!(s, RoomStatus::Maintenance);
    }
}
