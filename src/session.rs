//! Per-request session context: who is signed in and with which role.
//!
//! The role starts from the hint persisted in the token. When the hint is
//! absent it is looked up once (identity, then the `users` row) and cached
//! for the rest of the session. Lookup failures resolve to no role.
//!
//! The hint lives in the token, so invalidating a session closes it on the
//! backend: the token stops being accepted and the next sign-in resolves
//! the role afresh.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{AuthPayload, Role};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct Session {
    pub identity_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
    role: Option<Role>,
}

impl Session {
    pub fn from_claims(claims: &AuthPayload) -> Self {
        Self {
            identity_id: claims.sub,
            email: claims.email.clone(),
            session_id: claims.sid,
            role: claims.role,
        }
    }

    /// Cached role only, without touching the backend.
    pub fn cached_role(&self) -> Option<Role> {
        self.role
    }

    pub fn role(&mut self, storage: &Storage) -> Option<Role> {
        if self.role.is_none() {
            self.role = lookup_role(storage, self.identity_id);
        }
        self.role
    }

    /// Forget the cached role and close the backend session behind it.
    pub fn invalidate(&mut self, storage: &Storage) -> Result<()> {
        self.role = None;
        storage.sign_out(self.session_id)
    }
}

fn lookup_role(storage: &Storage, identity_id: Uuid) -> Option<Role> {
    let identity = match storage.get_identity(identity_id) {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            tracing::warn!(%identity_id, "no identity for session");
            return None;
        }
        Err(e) => {
            tracing::warn!(%identity_id, error = %e, "identity lookup failed");
            return None;
        }
    };
    match storage.get_user(identity.id) {
        Ok(Some(user)) => user.role,
        Ok(None) => {
            tracing::warn!(%identity_id, "no users row for identity");
            None
        }
        Err(e) => {
            tracing::warn!(%identity_id, error = %e, "role lookup failed");
            None
        }
    }
}
