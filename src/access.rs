//! Role gating for views and navigation links.
//!
//! Each view declares its own allow-list; there is no role hierarchy.

use serde::Serialize;

use crate::models::Role;

/// True iff a role is present and listed.
pub fn can_access(role: Option<Role>, allowed: &[Role]) -> bool {
    role.is_some_and(|r| allowed.contains(&r))
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    AdminDashboard,
    SaDashboard,
    TreasurerDashboard,
    OccupantDashboard,
    Register,
    RoomsOccupants,
    Reports,
    Analytics,
    Finance,
    Settings,
}

impl View {
    pub const ALL: [View; 10] = [
        View::AdminDashboard,
        View::SaDashboard,
        View::TreasurerDashboard,
        View::OccupantDashboard,
        View::Register,
        View::RoomsOccupants,
        View::Reports,
        View::Analytics,
        View::Finance,
        View::Settings,
    ];

    pub fn allowed_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            View::AdminDashboard => &[Admin],
            View::SaDashboard => &[StudentAffairs],
            View::TreasurerDashboard => &[Treasurer],
            View::OccupantDashboard => &[Occupant],
            View::Register | View::RoomsOccupants | View::Reports | View::Analytics => {
                &[Admin, StudentAffairs]
            }
            View::Finance => &[Admin, Treasurer],
            View::Settings => &[Admin, StudentAffairs, Treasurer],
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            View::AdminDashboard => "/admin",
            View::SaDashboard => "/sa",
            View::TreasurerDashboard => "/treasurer",
            View::OccupantDashboard => "/occupant",
            View::Register => "/register",
            View::RoomsOccupants => "/rooms-occupants",
            View::Reports => "/reports",
            View::Analytics => "/analytics",
            View::Finance => "/finance",
            View::Settings => "/settings",
        }
    }

    pub fn permits(&self, role: Option<Role>) -> bool {
        can_access(role, self.allowed_roles())
    }
}

/// Landing dashboard after login; `None` routes back to the public page.
pub fn dashboard_for(role: Option<Role>) -> Option<View> {
    match role? {
        Role::Admin => Some(View::AdminDashboard),
        Role::StudentAffairs => Some(View::SaDashboard),
        Role::Treasurer => Some(View::TreasurerDashboard),
        Role::Occupant => Some(View::OccupantDashboard),
    }
}

/// Views whose navigation links are shown to `role`.
pub fn navigation(role: Option<Role>) -> Vec<View> {
    View::ALL.into_iter().filter(|v| v.permits(role)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_access_is_membership() {
        for view in View::ALL {
            let allowed = view.allowed_roles();
            for role in Role::ALL {
                assert_eq!(can_access(Some(role), allowed), allowed.contains(&role));
            }
            assert!(!can_access(None, allowed));
        }
    }

    #[test]
    fn test_route_table() {
        assert!(View::Finance.permits(Some(Role::Treasurer)));
        assert!(!View::Finance.permits(Some(Role::StudentAffairs)));
        assert!(View::Register.permits(Some(Role::StudentAffairs)));
        assert!(!View::Settings.permits(Some(Role::Occupant)));
        assert!(!View::AdminDashboard.permits(Some(Role::StudentAffairs)));
    }

    #[test]
    fn test_dashboard_and_navigation() {
        assert_eq!(dashboard_for(Some(Role::StudentAffairs)).map(|v| v.path()), Some("/sa"));
        assert_eq!(dashboard_for(None), None);

        assert_eq!(
            navigation(Some(Role::Occupant)),
            vec![View::OccupantDashboard]
        );
        assert_eq!(
            navigation(Some(Role::Treasurer)),
            vec![View::TreasurerDashboard, View::Finance, View::Settings]
        );
        assert!(navigation(None).is_empty());
    }
}
