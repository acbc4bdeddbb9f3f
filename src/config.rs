//! Runtime configuration and logging setup.
//!
//! Values come from the process environment, after `.env` has been loaded
//! with dotenvy. Template placeholders (`your_...`) count as unset.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::error::{PortalError, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:11111";
/// Identifiers the credentials mailer cannot work without.
pub const EMAIL_SETTINGS: [&str; 3] = ["EMAILJS_SERVICE_ID", "EMAILJS_TEMPLATE_ID", "EMAILJS_PUBLIC_KEY"];
pub const DEFAULT_EMAILJS_ENDPOINT: &str = "https://api.emailjs.com/api/v1.0/email/send";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    /// Shared client key required in the `apikey` header when set.
    pub public_key: Option<String>,
    pub email: Option<EmailConfig>,
}

impl Config {
    /// Load `.env` (if any) and read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let bind = var("PORTAL_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .map_err(|e| PortalError::Validation(format!("PORTAL_BIND: {}", e)))?;

        let token_ttl_secs = match var("PORTAL_TOKEN_TTL_SECS") {
            Some(v) => v
                .parse()
                .map_err(|e| PortalError::Validation(format!("PORTAL_TOKEN_TTL_SECS: {}", e)))?,
            None => 3600,
        };

        let jwt_secret = var("PORTAL_JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("PORTAL_JWT_SECRET not set, using development secret");
            "m2h_development_secret".to_string()
        });

        Ok(Self {
            bind,
            data_dir: PathBuf::from(var("PORTAL_DATA_DIR").unwrap_or_else(|| "portal_data".into())),
            jwt_secret,
            token_ttl_secs,
            public_key: var("PORTAL_PUBLIC_KEY"),
            email: email_from_env(),
        })
    }

    /// Names of the email settings that are unset or still placeholders.
    pub fn missing_email_settings() -> Vec<&'static str> {
        EMAIL_SETTINGS
            .into_iter()
            .filter(|key| var(key).is_none())
            .collect()
    }
}

fn email_from_env() -> Option<EmailConfig> {
    Some(EmailConfig {
        service_id: var("EMAILJS_SERVICE_ID")?,
        template_id: var("EMAILJS_TEMPLATE_ID")?,
        public_key: var("EMAILJS_PUBLIC_KEY")?,
        endpoint: var("EMAILJS_ENDPOINT").unwrap_or_else(|| DEFAULT_EMAILJS_ENDPOINT.to_string()),
    })
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| is_configured(v))
}

/// False for blank values and `.env` template placeholders.
pub fn is_configured(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.starts_with("your_")
}

/// Initialize tracing: console output (text or JSON via `LOG_FORMAT`) plus an
/// optional daily-rolling file under `LOG_DIR`. Keep the guard alive for the
/// lifetime of the process so buffered file output is flushed.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_filter(filter()).boxed());
    } else {
        layers.push(fmt::layer().with_target(true).with_filter(filter()).boxed());
    }

    let mut guard = None;
    if let Some(dir) = env::var("LOG_DIR").ok().filter(|v| is_configured(v)) {
        std::fs::create_dir_all(&dir)
            .map_err(|e| PortalError::Internal(format!("log dir {}: {}", dir, e)))?;
        let appender = tracing_appender::rolling::daily(dir, "m2h_portal.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter())
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| PortalError::Internal(format!("logging init: {}", e)))?;

    Ok(guard)
}
