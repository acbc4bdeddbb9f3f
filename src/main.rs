//! M2H Portal server
//!
//! Starts the REST API over the sled-backed gateway.
//!
//! Usage:
//!   cargo run --bin load_data     # seed staff accounts and rooms
//!   cargo run --bin m2h_portal    # start server on PORTAL_BIND (default :11111)

use tokio::net::TcpListener;

use m2h_portal::config::{init_logging, Config};
use m2h_portal::rest::{create_router, AppState};
use m2h_portal::storage::Storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT / LOG_DIR may come from .env
    let _ = dotenvy::dotenv();
    let _log_guard = init_logging()?;
    let config = Config::from_env()?;

    tracing::info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        api_key = config.public_key.is_some(),
        email = config.email.is_some(),
        "M2H portal starting"
    );

    let storage = Storage::open(&config.data_dir)?;
    let state = AppState::from_config(storage.clone(), &config);
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("shutting down, flushing storage");
    storage.flush()?;
    Ok(())
}
