//! Account settings: profile row, notification preference and password.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{PortalError, Result};
use crate::models::Profile;
use crate::storage::Storage;

#[derive(Deserialize, Debug, Clone)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub notifications: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PasswordChange {
    pub password: String,
    pub confirm_password: String,
}

/// Stored profile, or an empty one if the user never saved it.
pub fn load_profile(storage: &Storage, user_id: Uuid) -> Result<Profile> {
    Ok(storage
        .get_profile(user_id)?
        .unwrap_or_else(|| Profile::empty(user_id)))
}

pub fn save_profile(storage: &Storage, user_id: Uuid, update: ProfileUpdate) -> Result<Profile> {
    let mut profile = load_profile(storage, user_id)?;
    if let Some(full_name) = update.full_name {
        profile.full_name = full_name.trim().to_string();
    }
    if let Some(phone) = update.phone {
        profile.phone = phone.trim().to_string();
    }
    if let Some(notifications) = update.notifications {
        profile.notifications = notifications;
    }
    storage.upsert_profile(&profile)?;
    Ok(profile)
}

pub fn toggle_notifications(storage: &Storage, user_id: Uuid) -> Result<Profile> {
    let mut profile = load_profile(storage, user_id)?;
    profile.notifications = !profile.notifications;
    storage.upsert_profile(&profile)?;
    Ok(profile)
}

/// Sets a new password and closes the user's other sessions; the session
/// making the change stays open.
pub fn change_password(
    storage: &Storage,
    user_id: Uuid,
    current_session: Uuid,
    change: &PasswordChange,
) -> Result<()> {
    if change.password.is_empty() || change.password != change.confirm_password {
        return Err(PortalError::Validation("Passwords do not match.".into()));
    }
    storage.update_password(user_id, &change.password)?;
    let closed = storage.close_sessions(user_id, Some(current_session))?;
    tracing::info!(%user_id, closed, "password updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults_update_and_toggle() {
        let storage = Storage::open_temporary().unwrap();
        let id = Uuid::new_v4();
        assert_eq!(load_profile(&storage, id).unwrap(), Profile::empty(id));

        let saved = save_profile(
            &storage,
            id,
            ProfileUpdate {
                full_name: Some(" Rosa Diaz ".into()),
                phone: None,
                notifications: None,
            },
        )
        .unwrap();
        assert_eq!(saved.full_name, "Rosa Diaz");
        assert!(saved.notifications);

        assert!(!toggle_notifications(&storage, id).unwrap().notifications);
        assert!(!load_profile(&storage, id).unwrap().notifications);
    }

    #[test]
    fn test_password_change_requires_match() {
        let storage = Storage::open_temporary().unwrap();
        let identity = storage.sign_up("t@m2h.test", "first-pass").unwrap();
        let (_, current) = storage.sign_in("t@m2h.test", "first-pass", 60).unwrap();
        let (_, elsewhere) = storage.sign_in("t@m2h.test", "first-pass", 60).unwrap();

        let mismatch = PasswordChange {
            password: "a".into(),
            confirm_password: "b".into(),
        };
        assert!(matches!(
            change_password(&storage, identity.id, current, &mismatch),
            Err(PortalError::Validation(_))
        ));

        let ok = PasswordChange {
            password: "second-pass".into(),
            confirm_password: "second-pass".into(),
        };
        assert!(storage.session_active(elsewhere).unwrap());
        change_password(&storage, identity.id, current, &ok).unwrap();
        assert!(storage.sign_in("t@m2h.test", "second-pass", 60).is_ok());
        assert!(storage.session_active(current).unwrap());
        assert!(!storage.session_active(elsewhere).unwrap());
    }
}
