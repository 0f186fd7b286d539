//! Listing Monitor binary
//!
//! Usage: `listing-monitor [config-file]`. Without an argument the file named
//! by `MONITOR_CONFIG` is used; settings may also come purely from `MONITOR_*`
//! environment variables.

#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use listing_monitor::application::{Monitor, Scheduler};
use listing_monitor::infrastructure::logging::init_logging_with_config;
use listing_monitor::infrastructure::{AppConfig, TracingMetricSink};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MONITOR_CONFIG").ok())
        .map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(config.logging.clone()).context("Failed to initialize logging")?;

    info!("🚀 Listing Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Monitoring {} URLs every {:?}", config.urls.len(), config.interval());

    let monitor = Monitor::from_config(&config, Arc::new(TracingMetricSink))
        .await
        .context("Failed to build monitor")?;

    let retention = config
        .storage
        .retention_days
        .map(|days| Duration::from_secs(u64::from(days) * SECONDS_PER_DAY));
    let scheduler = Scheduler::new(Arc::new(monitor), config.interval()).with_retention(retention);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let summary = scheduler.run(cancel).await;
    info!("👋 Exiting after {} cycles", summary.runs());
    Ok(())
}
