//! Violation and maintenance reports.
//!
//! The lifecycle is open → in_progress → resolved, with open/in_progress →
//! rejected. Reviewers may still set any status directly; steps outside the
//! lifecycle are accepted and logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assignment::current_room;
use crate::error::{PortalError, Result};
use crate::models::{NewReport, Occupant, Report, ReportStatus, Room};
use crate::storage::Storage;

impl ReportStatus {
    pub fn follows_lifecycle(from: ReportStatus, to: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (from, to),
            (Open, InProgress) | (InProgress, Resolved) | (Open, Rejected) | (InProgress, Rejected)
        )
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ReporterRef {
    pub id: u64,
    /// "first last"
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct RoomRef {
    pub id: u64,
    pub room_number: String,
    pub building: String,
}

/// A report joined with its reporter and room.
#[derive(Serialize, Debug, Clone)]
pub struct ReportView {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub reporter: Option<ReporterRef>,
    pub room: Option<RoomRef>,
}

impl ReportView {
    fn join(report: Report, reporter: Option<Occupant>, room: Option<Room>) -> Self {
        Self {
            id: report.id,
            title: report.title,
            description: report.description,
            status: report.status,
            created_at: report.created_at,
            reporter: reporter.map(|o| ReporterRef {
                id: o.id,
                name: o.full_name(),
                first_name: o.first_name,
                last_name: o.last_name,
                email: o.email,
            }),
            room: room.map(|r| RoomRef {
                id: r.id,
                room_number: r.room_number,
                building: r.building,
            }),
        }
    }

    /// Case-insensitive substring match on title, description, reporter
    /// full name or "building room_number".
    pub fn matches_search(&self, search: &str) -> bool {
        let s = search.to_lowercase();
        self.title.to_lowercase().contains(&s)
            || self.description.to_lowercase().contains(&s)
            || self
                .reporter
                .as_ref()
                .is_some_and(|r| r.name.to_lowercase().contains(&s))
            || self.room.as_ref().is_some_and(|r| {
                format!("{} {}", r.building, r.room_number)
                    .to_lowercase()
                    .contains(&s)
            })
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    pub search: Option<String>,
}

impl ReportFilter {
    pub fn accepts(&self, view: &ReportView) -> bool {
        if self.status.is_some_and(|s| s != view.status) {
            return false;
        }
        match self.search.as_deref() {
            None | Some("") => true,
            Some(s) => view.matches_search(s),
        }
    }
}

fn view_of(storage: &Storage, report: Report) -> Result<ReportView> {
    let reporter = match report.reporter_id {
        Some(id) => storage.get_occupant(id)?,
        None => None,
    };
    let room = match report.room_id {
        Some(id) => storage.get_room(id)?,
        None => None,
    };
    Ok(ReportView::join(report, reporter, room))
}

/// Joined reports, newest first, narrowed by the filter.
pub fn list(storage: &Storage, filter: &ReportFilter) -> Result<Vec<ReportView>> {
    let mut reports = storage.list_reports()?;
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut views = vec![];
    for report in reports {
        let view = view_of(storage, report)?;
        if filter.accepts(&view) {
            views.push(view);
        }
    }
    Ok(views)
}

pub fn change_status(storage: &Storage, report_id: u64, status: ReportStatus) -> Result<ReportView> {
    let before = storage
        .get_report(report_id)?
        .ok_or_else(|| PortalError::not_found("report", report_id))?;
    if before.status != status && !ReportStatus::follows_lifecycle(before.status, status) {
        tracing::warn!(report_id, from = ?before.status, to = ?status, "status change outside lifecycle");
    }
    let report = storage.set_report_status(report_id, status)?;
    tracing::info!(report_id, status = ?status, "report status changed");
    view_of(storage, report)
}

#[derive(Deserialize, Debug, Clone)]
pub struct FileReport {
    pub title: String,
    pub description: String,
    pub room_id: Option<u64>,
}

/// File a report as an occupant; the room defaults to the occupant's current room.
pub fn file_report(storage: &Storage, occupant_id: Option<u64>, req: FileReport) -> Result<ReportView> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(PortalError::Validation("Title is required".into()));
    }
    let room_id = match (req.room_id, occupant_id) {
        (Some(id), _) => {
            storage
                .get_room(id)?
                .ok_or_else(|| PortalError::not_found("room", id))?;
            Some(id)
        }
        (None, Some(occupant)) => current_room(storage, occupant)?.map(|r| r.id),
        (None, None) => None,
    };
    let report = storage.insert_report(NewReport {
        title: title.to_string(),
        description: req.description.trim().to_string(),
        reporter_id: occupant_id,
        room_id,
    })?;
    tracing::info!(report_id = report.id, ?room_id, "report filed");
    view_of(storage, report)
}

/// Reports filed by one occupant, newest first.
pub fn reports_by(storage: &Storage, occupant_id: u64) -> Result<Vec<ReportView>> {
    Ok(list(storage, &ReportFilter::default())?
        .into_iter()
        .filter(|r| r.reporter.as_ref().is_some_and(|o| o.id == occupant_id))
        .collect())
}
