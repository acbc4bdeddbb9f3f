//! Bulk occupant registration.
//!
//! Each row runs as a saga: insert occupant, create auth identity, insert
//! the users row, email the credentials. When step 2 or 3 fails the steps
//! already done are undone in reverse order, best-effort and without retry.
//! A failed email does not fail the row, but a batch is refused outright
//! when no email service is configured to deliver the passwords.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::auth::generate_password;
use crate::error::{PortalError, Result};
use crate::mailer::{CredentialsEmail, Mailer};
use crate::models::{Identity, NewOccupant, Occupant, Role, User};
use crate::storage::{normalize_email, Storage};

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email shape pattern")
});

/// Backend calls the registration saga depends on.
pub trait RegistrationBackend: Send + Sync {
    fn insert_occupant(&self, new: NewOccupant) -> Result<Occupant>;
    fn delete_occupant(&self, id: u64) -> Result<()>;
    fn sign_up(&self, email: &str, password: &str) -> Result<Identity>;
    fn delete_identity(&self, id: Uuid) -> Result<()>;
    fn insert_user(&self, user: &User) -> Result<()>;
}

impl RegistrationBackend for Storage {
    fn insert_occupant(&self, new: NewOccupant) -> Result<Occupant> {
        Storage::insert_occupant(self, new)
    }

    fn delete_occupant(&self, id: u64) -> Result<()> {
        Storage::delete_occupant(self, id)
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        Storage::sign_up(self, email, password)
    }

    fn delete_identity(&self, id: Uuid) -> Result<()> {
        Storage::delete_identity(self, id)
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        Storage::insert_user(self, user)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct OccupantRow {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl OccupantRow {
    fn is_blank(&self) -> bool {
        self.email.trim().is_empty()
            && self.first_name.trim().is_empty()
            && self.last_name.trim().is_empty()
    }

    fn errors(&self) -> Vec<&'static str> {
        let mut errors = vec![];
        match self.first_name.trim().chars().count() {
            0 => errors.push("First name is required"),
            1 => errors.push("First name must be at least 2 characters"),
            _ => {}
        }
        match self.last_name.trim().chars().count() {
            0 => errors.push("Last name is required"),
            1 => errors.push("Last name must be at least 2 characters"),
            _ => {}
        }
        let email = self.email.trim();
        if email.is_empty() {
            errors.push("Email is required");
        } else if !EMAIL_SHAPE.is_match(email) {
            errors.push("Invalid email format");
        }
        errors
    }
}

/// Local checks run before any backend call: blank rows are dropped, every
/// remaining row must be valid and emails must be unique (case-insensitive).
pub fn validate_batch(rows: &[OccupantRow]) -> Result<Vec<OccupantRow>> {
    let rows: Vec<OccupantRow> = rows.iter().filter(|r| !r.is_blank()).cloned().collect();
    if rows.is_empty() {
        return Err(PortalError::Validation(
            "Please fill in at least one complete occupant form.".into(),
        ));
    }

    let problems: Vec<String> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let errors = row.errors();
            (!errors.is_empty()).then(|| format!("Occupant {}: {}", i + 1, errors.join(", ")))
        })
        .collect();
    if !problems.is_empty() {
        return Err(PortalError::Validation(format!(
            "Validation errors:\n{}",
            problems.join("\n")
        )));
    }

    let mut seen = HashSet::new();
    let mut duplicates = vec![];
    for row in &rows {
        let email = normalize_email(&row.email);
        if !seen.insert(email.clone()) && !duplicates.contains(&email) {
            duplicates.push(email);
        }
    }
    if !duplicates.is_empty() {
        return Err(PortalError::Validation(format!(
            "Duplicate email addresses found: {}",
            duplicates.join(", ")
        )));
    }

    Ok(rows)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    InsertOccupant,
    CreateIdentity,
    InsertUser,
}

/// Outcome of undoing one completed step.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Compensation {
    pub step: Step,
    pub succeeded: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct CreatedAccount {
    pub email: String,
    pub occupant_id: u64,
    pub user_id: Uuid,
    pub credentials_sent: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct FailedAccount {
    pub email: String,
    pub reason: String,
    pub failed_step: Step,
    pub compensations: Vec<Compensation>,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct RegistrationSummary {
    pub created: Vec<CreatedAccount>,
    pub failed: Vec<FailedAccount>,
}

impl RegistrationSummary {
    pub fn message(&self) -> String {
        let mut parts = vec![];
        if !self.created.is_empty() {
            parts.push(format!(
                "Successfully created {} account(s)!",
                self.created.len()
            ));
        }
        if !self.failed.is_empty() {
            let failed: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("{} ({})", f.email, f.reason))
                .collect();
            parts.push(format!(
                "{} account(s) failed to create.\nFailed: {}",
                self.failed.len(),
                failed.join(", ")
            ));
        }
        parts.join(" ")
    }
}

enum Undo {
    Occupant(u64),
    Identity(Uuid),
}

/// Completed steps of one row, undone in reverse on failure.
#[derive(Default)]
struct Saga {
    done: Vec<Undo>,
}

impl Saga {
    fn record(&mut self, undo: Undo) {
        self.done.push(undo);
    }

    fn compensate<B: RegistrationBackend + ?Sized>(self, backend: &B, email: &str) -> Vec<Compensation> {
        self.done
            .into_iter()
            .rev()
            .map(|undo| {
                let (step, result) = match undo {
                    Undo::Identity(id) => (Step::CreateIdentity, backend.delete_identity(id)),
                    Undo::Occupant(id) => (Step::InsertOccupant, backend.delete_occupant(id)),
                };
                if let Err(e) = &result {
                    tracing::error!(%email, ?step, error = %e, "compensation failed");
                }
                Compensation {
                    step,
                    succeeded: result.is_ok(),
                }
            })
            .collect()
    }
}

/// Validate the batch, then register each row in order.
pub async fn register_occupants<B>(
    backend: &B,
    mailer: &dyn Mailer,
    rows: &[OccupantRow],
) -> Result<RegistrationSummary>
where
    B: RegistrationBackend + ?Sized,
{
    let missing = mailer.missing_settings();
    if !missing.is_empty() {
        tracing::warn!(?missing, "registration refused, email not configured");
        return Err(PortalError::Validation(format!(
            "Configuration missing: {}. Please update your .env file.",
            missing.join(", ")
        )));
    }

    let rows = validate_batch(rows)?;
    let mut summary = RegistrationSummary::default();
    for row in &rows {
        match register_one(backend, mailer, row).await {
            Ok(created) => summary.created.push(created),
            Err(failed) => summary.failed.push(failed),
        }
    }
    tracing::info!(
        created = summary.created.len(),
        failed = summary.failed.len(),
        "registration batch finished"
    );
    Ok(summary)
}

async fn register_one<B>(
    backend: &B,
    mailer: &dyn Mailer,
    row: &OccupantRow,
) -> std::result::Result<CreatedAccount, FailedAccount>
where
    B: RegistrationBackend + ?Sized,
{
    let email = normalize_email(&row.email);
    let password = generate_password();
    let mut saga = Saga::default();

    let fail = |reason: &str, step: Step, compensations: Vec<Compensation>| FailedAccount {
        email: email.clone(),
        reason: reason.to_string(),
        failed_step: step,
        compensations,
    };

    let occupant = match backend.insert_occupant(NewOccupant {
        first_name: row.first_name.trim().to_string(),
        last_name: row.last_name.trim().to_string(),
        email: email.clone(),
    }) {
        Ok(occupant) => occupant,
        Err(e) => {
            tracing::error!(%email, error = %e, "occupant insert failed");
            let reason = match e {
                PortalError::Conflict(_) => "already exists",
                _ => "database error",
            };
            return Err(fail(reason, Step::InsertOccupant, vec![]));
        }
    };
    saga.record(Undo::Occupant(occupant.id));

    let identity = match backend.sign_up(&email, &password) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(%email, error = %e, "identity creation failed");
            let reason = match e {
                PortalError::Conflict(_) => "user already exists",
                _ => "auth error",
            };
            return Err(fail(reason, Step::CreateIdentity, saga.compensate(backend, &email)));
        }
    };
    saga.record(Undo::Identity(identity.id));

    let user = User {
        id: identity.id,
        email: email.clone(),
        role: Some(Role::Occupant),
        occupant_id: Some(occupant.id),
        status: "active".into(),
    };
    if let Err(e) = backend.insert_user(&user) {
        tracing::error!(%email, error = %e, "users row insert failed");
        return Err(fail("user record error", Step::InsertUser, saga.compensate(backend, &email)));
    }

    let message = CredentialsEmail {
        to_email: email.clone(),
        to_name: occupant.full_name(),
        password: password.clone(),
    };
    let credentials_sent = match mailer.send_credentials(&message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(%email, error = %e, "account created but credentials email failed");
            tracing::debug!(%email, %password, "undelivered initial password");
            false
        }
    };

    Ok(CreatedAccount {
        email,
        occupant_id: occupant.id,
        user_id: identity.id,
        credentials_sent,
    })
}

/// Creates a staff (or occupant) login directly: identity plus users row.
/// Used for seeding; staff accounts have no occupant row.
pub fn create_account<B>(
    backend: &B,
    email: &str,
    password: &str,
    role: Role,
    occupant_id: Option<u64>,
) -> Result<User>
where
    B: RegistrationBackend + ?Sized,
{
    let identity = backend.sign_up(email, password)?;
    let user = User {
        id: identity.id,
        email: identity.email.clone(),
        role: Some(role),
        occupant_id,
        status: "active".into(),
    };
    if let Err(e) = backend.insert_user(&user) {
        if let Err(undo) = backend.delete_identity(identity.id) {
            tracing::error!(email = %user.email, error = %undo, "compensation failed");
        }
        return Err(e);
    }
    tracing::info!(email = %user.email, %role, "account created");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::LogMailer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn row(email: &str, first: &str, last: &str) -> OccupantRow {
        OccupantRow {
            email: email.into(),
            first_name: first.into(),
            last_name: last.into(),
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<CredentialsEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_credentials(&self, email: &CredentialsEmail) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send_credentials(&self, _: &CredentialsEmail) -> Result<()> {
            Err(PortalError::Mail("smtp down".into()))
        }
    }

    /// Delegates to Storage, failing the chosen step and counting calls.
    struct FlakyBackend {
        inner: Storage,
        fail_sign_up: bool,
        fail_user_insert: bool,
        calls: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(fail_sign_up: bool, fail_user_insert: bool) -> Self {
            Self {
                inner: Storage::open_temporary().unwrap(),
                fail_sign_up,
                fail_user_insert,
                calls: AtomicUsize::new(0),
            }
        }

        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RegistrationBackend for FlakyBackend {
        fn insert_occupant(&self, new: NewOccupant) -> Result<Occupant> {
            self.tick();
            self.inner.insert_occupant(new)
        }

        fn delete_occupant(&self, id: u64) -> Result<()> {
            self.tick();
            self.inner.delete_occupant(id)
        }

        fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
            self.tick();
            if self.fail_sign_up {
                return Err(PortalError::Backend("signup rate limit".into()));
            }
            self.inner.sign_up(email, password)
        }

        fn delete_identity(&self, id: Uuid) -> Result<()> {
            self.tick();
            self.inner.delete_identity(id)
        }

        fn insert_user(&self, user: &User) -> Result<()> {
            self.tick();
            if self.fail_user_insert {
                return Err(PortalError::Storage("users table unavailable".into()));
            }
            self.inner.insert_user(user)
        }
    }

    #[test]
    fn test_validation_messages() {
        let err = validate_batch(&[row("", "", "")]).unwrap_err();
        assert!(err.to_string().contains("at least one complete occupant"));

        let err = validate_batch(&[row("bad-email", "A", "Cruz")]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Occupant 1: First name must be at least 2 characters"));
        assert!(msg.contains("Invalid email format"));

        let rows = validate_batch(&[row("a@b.co", "Ana", "Cruz"), row(" ", "", "")]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_emails_rejected_before_backend() {
        let backend = FlakyBackend::new(false, false);
        let mailer = RecordingMailer::default();
        let err = register_occupants(
            &backend,
            &mailer,
            &[
                row("Ana@M2H.test", "Ana", "Cruz"),
                row(" ana@m2h.test ", "Anna", "Reyes"),
            ],
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Duplicate email addresses found: ana@m2h.test"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_registration_links_user_and_emails() {
        let storage = Storage::open_temporary().unwrap();
        let mailer = RecordingMailer::default();
        let summary = register_occupants(&storage, &mailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap();

        assert_eq!(summary.created.len(), 1);
        let created = &summary.created[0];
        assert!(created.credentials_sent);

        let user = storage.get_user(created.user_id).unwrap().unwrap();
        assert_eq!(user.role, Some(Role::Occupant));
        assert_eq!(user.occupant_id, Some(created.occupant_id));

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].to_name, "Ana Cruz");
        assert!(storage.sign_in("ana@m2h.test", &sent[0].password, 60).is_ok());
    }

    #[tokio::test]
    async fn test_identity_failure_undoes_occupant() {
        let backend = FlakyBackend::new(true, false);
        let summary = register_occupants(&backend, &FailingMailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap();

        let failed = &summary.failed[0];
        assert_eq!(failed.reason, "auth error");
        assert_eq!(failed.failed_step, Step::CreateIdentity);
        assert_eq!(
            failed.compensations,
            vec![Compensation { step: Step::InsertOccupant, succeeded: true }]
        );
        assert!(backend.inner.list_occupants().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_row_failure_undoes_identity_then_occupant() {
        let backend = FlakyBackend::new(false, true);
        let summary = register_occupants(&backend, &FailingMailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap();

        let failed = &summary.failed[0];
        assert_eq!(failed.failed_step, Step::InsertUser);
        let steps: Vec<Step> = failed.compensations.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![Step::CreateIdentity, Step::InsertOccupant]);
        assert!(backend.inner.find_identity_by_email("ana@m2h.test").unwrap().is_none());
        assert!(backend.inner.list_occupants().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_email_failure_still_counts_as_created() {
        let storage = Storage::open_temporary().unwrap();
        let summary = register_occupants(&storage, &FailingMailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap();
        assert_eq!(summary.created.len(), 1);
        assert!(!summary.created[0].credentials_sent);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_email_refuses_batch_before_backend() {
        let backend = FlakyBackend::new(false, false);
        let mailer = LogMailer::new(vec!["EMAILJS_SERVICE_ID", "EMAILJS_PUBLIC_KEY"]);
        let err = register_occupants(&backend, &mailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Configuration missing: EMAILJS_SERVICE_ID, EMAILJS_PUBLIC_KEY. Please update your .env file."
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(backend.inner.list_occupants().unwrap().is_empty());
        assert!(backend.inner.find_identity_by_email("ana@m2h.test").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_identity_is_user_already_exists() {
        let storage = Storage::open_temporary().unwrap();
        storage.sign_up("ana@m2h.test", "taken-pass").unwrap();

        let summary = register_occupants(
            &storage,
            &RecordingMailer::default(),
            &[row("ana@m2h.test", "Ana", "Cruz")],
        )
        .await
        .unwrap();
        let failed = &summary.failed[0];
        assert_eq!(failed.reason, "user already exists");
        assert_eq!(failed.failed_step, Step::CreateIdentity);
        assert!(storage.list_occupants().unwrap().is_empty());
    }

    #[test]
    fn test_create_account_undoes_identity_when_users_row_fails() {
        let backend = FlakyBackend::new(false, true);
        let err = create_account(&backend, "sa@m2h.test", "affairs-pass", Role::StudentAffairs, None)
            .unwrap_err();
        assert!(matches!(err, PortalError::Storage(_)));
        // sign_up, insert_user, delete_identity
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(backend.inner.find_identity_by_email("sa@m2h.test").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_occupant_reported_per_row() {
        let storage = Storage::open_temporary().unwrap();
        let mailer = RecordingMailer::default();
        register_occupants(&storage, &mailer, &[row("ana@m2h.test", "Ana", "Cruz")])
            .await
            .unwrap();

        let summary = register_occupants(
            &storage,
            &mailer,
            &[row("ana@m2h.test", "Ana", "Cruz"), row("ben@m2h.test", "Ben", "Abad")],
        )
        .await
        .unwrap();
        assert_eq!(summary.created.len(), 1);
        assert_eq!(summary.failed[0].reason, "already exists");
        assert!(summary.message().contains("1 account(s) failed to create."));
    }
}
