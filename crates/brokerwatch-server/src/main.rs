//! brokerwatch Binary
//!
//! Runs archival, purge and stats maintenance against a SQLite database.
//!
//! # Environment Variables
//!
//! - `BROKERWATCH_DB`: SQLite path (default: ./data/brokerwatch.db)
//! - `BROKERWATCH_ARCHIVE_BATCH_SIZE`: rows per archive transaction (default: 1000)
//! - `BROKERWATCH_ARCHIVE_INTERVAL_SECS`: default 3600
//! - `BROKERWATCH_PURGE_INTERVAL_SECS`: default 86400
//! - `BROKERWATCH_STATS_INTERVAL_SECS`: default 3600
//! - `BROKERWATCH_STATS_CLEANUP_INTERVAL_SECS`: default 86400
//! - `RUST_LOG`: log level (default: info)
//!
//! # Example
//!
//! ```bash
//! export BROKERWATCH_DB=./data/brokerwatch.db
//! export RUST_LOG=debug
//! cargo run --bin brokerwatch
//! ```

use brokerwatch_server::{Engine, EngineConfig};
use std::path::Path;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env();

    info!("brokerwatch starting");
    info!(database = %config.database_path, "Configuration");
    info!(
        batch_size = config.maintenance.batch_size,
        archive_interval_ms = config.maintenance.archive_interval_ms,
        purge_interval_ms = config.maintenance.purge_interval_ms,
        stats_interval_ms = config.maintenance.stats_interval_ms,
        stats_cleanup_interval_ms = config.maintenance.stats_cleanup_interval_ms,
        "Maintenance"
    );

    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let database_path = config.database_path.clone();
    let engine = Engine::open(&database_path, None, config).await?;
    info!("Metadata store ready");

    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping...");

    engine.shutdown().await;
    Ok(())
}
