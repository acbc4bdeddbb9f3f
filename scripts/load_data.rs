//! Seed script for the M2H portal
//!
//! Populates the gateway with:
//! - staff logins (admin, SA, treasurer)
//! - a handful of rooms across two buildings
//! - one registered occupant with a room and an open report
//! Run: cargo run --bin load_data
//! Idempotent enough to re-run: existing accounts are skipped.

use m2h_portal::assignment::assign;
use m2h_portal::config::{init_logging, Config};
use m2h_portal::error::PortalError;
use m2h_portal::models::{NewOccupant, NewRoom, Role};
use m2h_portal::registration::create_account;
use m2h_portal::reports::{file_report, FileReport};
use m2h_portal::storage::Storage;

const STAFF: [(&str, &str, Role); 3] = [
    ("admin@m2h.local", "admin1234!", Role::Admin),
    ("sa@m2h.local", "affairs1234!", Role::StudentAffairs),
    ("treasurer@m2h.local", "ledger1234!", Role::Treasurer),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let _log_guard = init_logging()?;
    let config = Config::from_env()?;
    let storage = Storage::open(&config.data_dir)?;

    for (email, password, role) in STAFF {
        match create_account(&storage, email, password, role, None) {
            Ok(_) => tracing::info!(%email, %role, "staff login seeded"),
            Err(PortalError::Conflict(msg)) => tracing::info!(%email, %msg, "skipped"),
            Err(e) => return Err(e.into()),
        }
    }

    if !storage.list_rooms()?.is_empty() {
        tracing::info!("rooms already present, leaving them untouched");
        storage.flush()?;
        return Ok(());
    }

    let mut rooms = vec![];
    for (building, rent) in [("North", 3500.0), ("South", 2800.0)] {
        for floor_room in 1..=3 {
            rooms.push(storage.insert_room(NewRoom {
                room_number: format!("{}0{}", if building == "North" { 1 } else { 2 }, floor_room),
                building: building.to_string(),
                capacity: 1,
                monthly_rent: rent,
            })?);
        }
    }
    tracing::info!(count = rooms.len(), "rooms seeded");

    let occupant = storage.insert_occupant(NewOccupant {
        first_name: "Sample".into(),
        last_name: "Occupant".into(),
        email: "occupant@m2h.local".into(),
    })?;
    create_account(
        &storage,
        &occupant.email,
        "occupant1234!",
        Role::Occupant,
        Some(occupant.id),
    )?;
    let (room, _) = assign(&storage, rooms[0].id, occupant.id)?;
    file_report(
        &storage,
        Some(occupant.id),
        FileReport {
            title: "Leaking faucet".into(),
            description: "Bathroom sink drips constantly".into(),
            room_id: None,
        },
    )?;
    tracing::info!(room = %room.label(), email = %occupant.email, "sample occupant seeded");

    storage.flush()?;
    Ok(())
}
