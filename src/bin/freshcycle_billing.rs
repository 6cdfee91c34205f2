//! freshcycle-billing: subscription billing daemon
//!
//! Sweeps due subscriptions on the configured interval, reconciles
//! indeterminate charges and redelivers undelivered notifications. Runs
//! until interrupted.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   path: ./data/freshcycle.db
//! billing:
//!   sweep_interval_secs: 3600
//!   max_concurrency: 8
//! collaborators:
//!   payment_url: http://payments.internal:8080
//! ```
//!
//! Set `FRESHCYCLE_LOG_FORMAT=json` for JSON log lines.

use tracing::{error, info};

use freshcycle::config::Config;
use freshcycle::storage::init_storage;
use freshcycle::utils::bootstrap::{init_tracing, init_tracing_json, parse_config_path};
use freshcycle::EngineBuilder;

const LOG_FORMAT_ENV_VAR: &str = "FRESHCYCLE_LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match std::env::var(LOG_FORMAT_ENV_VAR).as_deref() {
        Ok("json") => init_tracing_json(),
        _ => init_tracing(),
    }

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting freshcycle-billing");

    let stores = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let engine = EngineBuilder::new(config)
        .with_stores(stores)
        .with_http_collaborators()?
        .build()?;

    let handle = engine.billing().clone().spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
