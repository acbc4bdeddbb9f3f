//! Transactional email for newly registered occupants.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::config::{EmailConfig, EMAIL_SETTINGS};
use crate::error::{PortalError, Result};

pub const FROM_NAME: &str = "M2H Portal Admin";

#[derive(Serialize, Debug, Clone)]
pub struct CredentialsEmail {
    pub to_email: String,
    pub to_name: String,
    pub password: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_credentials(&self, email: &CredentialsEmail) -> Result<()>;

    /// Settings that must be filled in before credentials can be delivered.
    fn missing_settings(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Template send through the EmailJS REST endpoint.
pub struct EmailJsMailer {
    client: Client,
    config: EmailConfig,
}

impl EmailJsMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn payload(&self, email: &CredentialsEmail) -> serde_json::Value {
        json!({
            "service_id": self.config.service_id,
            "template_id": self.config.template_id,
            "user_id": self.config.public_key,
            "template_params": {
                "to_email": email.to_email,
                "to_name": email.to_name,
                "user_email": email.to_email,
                "user_password": email.password,
                "from_name": FROM_NAME,
            },
        })
    }
}

#[async_trait]
impl Mailer for EmailJsMailer {
    async fn send_credentials(&self, email: &CredentialsEmail) -> Result<()> {
        let res = self
            .client
            .post(&self.config.endpoint)
            .json(&self.payload(email))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PortalError::Mail(format!("{}: {}", status, body)));
        }
        tracing::info!(to = %email.to_email, "credentials email sent");
        Ok(())
    }
}

/// Stands in when no email service is configured. Registration refuses to
/// run against it, since generated passwords would be undeliverable.
#[derive(Debug, Default)]
pub struct LogMailer {
    missing: Vec<&'static str>,
}

impl LogMailer {
    pub fn new(missing: Vec<&'static str>) -> Self {
        Self { missing }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_credentials(&self, email: &CredentialsEmail) -> Result<()> {
        tracing::info!(to = %email.to_email, "email service not configured, credentials not sent");
        Err(PortalError::Mail("email service not configured".into()))
    }

    fn missing_settings(&self) -> Vec<&'static str> {
        if self.missing.is_empty() {
            EMAIL_SETTINGS.to_vec()
        } else {
            self.missing.clone()
        }
    }
}
