//! Read-only summaries behind the finance, analytics and occupant views.

use serde::Serialize;

use crate::assignment::current_room;
use crate::error::{PortalError, Result};
use crate::models::{Occupant, ReportStatus, Room, RoomStatus};
use crate::reports::{self, ReportView};
use crate::storage::Storage;

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RoomCounts {
    pub available: usize,
    pub occupied: usize,
    pub maintenance: usize,
    pub reserved: usize,
}

impl RoomCounts {
    fn tally(rooms: &[Room]) -> Self {
        let mut counts = Self::default();
        for room in rooms {
            match room.status {
                RoomStatus::Available => counts.available += 1,
                RoomStatus::Occupied => counts.occupied += 1,
                RoomStatus::Maintenance => counts.maintenance += 1,
                RoomStatus::Reserved => counts.reserved += 1,
            }
        }
        counts
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FinancialSummary {
    /// Rent due each month from occupied rooms.
    pub projected_monthly_income: f64,
    /// Rent not collected on available rooms.
    pub vacancy_loss: f64,
    pub rooms: RoomCounts,
}

pub fn financial_summary(storage: &Storage) -> Result<FinancialSummary> {
    let rooms = storage.list_rooms()?;
    let rent_where = |status: RoomStatus| -> f64 {
        rooms
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.monthly_rent)
            .sum()
    };
    Ok(FinancialSummary {
        projected_monthly_income: rent_where(RoomStatus::Occupied),
        vacancy_loss: rent_where(RoomStatus::Available),
        rooms: RoomCounts::tally(&rooms),
    })
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Analytics {
    pub users: usize,
    pub open_reports: usize,
    /// Occupied rooms as a percentage of all rooms.
    pub occupancy: f64,
    pub revenue: f64,
}

pub fn analytics(storage: &Storage) -> Result<Analytics> {
    let rooms = storage.list_rooms()?;
    let occupied = rooms.iter().filter(|r| r.status == RoomStatus::Occupied).count();
    let occupancy = if rooms.is_empty() {
        0.0
    } else {
        occupied as f64 * 100.0 / rooms.len() as f64
    };
    let open_reports = storage
        .list_reports()?
        .iter()
        .filter(|r| matches!(r.status, ReportStatus::Open | ReportStatus::InProgress))
        .count();
    Ok(Analytics {
        users: storage.list_users()?.len(),
        open_reports,
        occupancy,
        revenue: financial_summary(storage)?.projected_monthly_income,
    })
}

#[derive(Serialize, Debug, Clone)]
pub struct OccupantDashboard {
    pub occupant: Occupant,
    pub room: Option<Room>,
    pub reports: Vec<ReportView>,
}

pub fn occupant_dashboard(storage: &Storage, occupant_id: u64) -> Result<OccupantDashboard> {
    let occupant = storage
        .get_occupant(occupant_id)?
        .ok_or_else(|| PortalError::not_found("occupant", occupant_id))?;
    Ok(OccupantDashboard {
        room: current_room(storage, occupant_id)?,
        reports: reports::reports_by(storage, occupant_id)?,
        occupant,
    })
}
