//! Gridpost telemetry forwarding service.
//!
//! Main entry point: loads configuration, initializes tracing, starts the
//! delivery engine with every configured destination, and coordinates
//! graceful shutdown with a final queue flush.

use std::sync::Arc;

use anyhow::{Context, Result};
use gridpost_core::{events::TracingSink, time::RealClock};
use gridpost_delivery::{DeliveryEngine, JsonFileStore, TracingIssueSink};
use tracing::{error, info};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_filter);

    info!(
        data_dir = %config.data_dir,
        destinations = config.destinations.len(),
        "starting gridpost telemetry forwarder"
    );

    let store = Arc::new(
        JsonFileStore::new(&config.data_dir).context("failed to open state directory")?,
    );

    let engine = DeliveryEngine::new(
        config.to_engine_config(),
        store,
        Arc::new(TracingSink::new()),
        Arc::new(TracingIssueSink::new()),
        Arc::new(RealClock::new()),
    )
    .context("failed to create delivery engine")?;

    for destination in config.destination_configs() {
        let id = destination.id.clone();
        match engine.start_destination(destination).await {
            Ok(()) => {},
            Err(e) => {
                // fatal: a destination with unreadable state must not run
                error!(destination = %id, error = %e, "failed to start destination");
                return Err(e).context(format!("destination {id} failed to start"));
            },
        }
    }

    info!("gridpost is ready");

    shutdown_signal().await;
    info!("shutdown signal received, flushing queues");

    engine.shutdown().await;
    info!("gridpost shutdown complete");
    Ok(())
}

/// Initializes tracing with the configured filter, honoring `RUST_LOG`
/// when set.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .expect("invalid log filter");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C signal");
        },
        () = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
