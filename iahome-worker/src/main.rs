//! # IAHome Worker
//!
//! Maintenance worker for the IAHome gateway.
//!
//! Every `WORKER_INTERVAL_SECS` it:
//! - deactivates grants whose expiry date has passed
//! - clears expired password-reset tokens
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p iahome-worker
//! ```

use iahome_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use iahome_worker::{
    config::WorkerConfig,
    orchestrator::{MaintenanceOrchestrator, OrchestratorConfig},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iahome_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("IAHome Worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(DatabaseConfig {
        max_connections: config.max_connections,
        ..DatabaseConfig::with_url(&config.database_url)
    })
    .await?;

    let orchestrator = MaintenanceOrchestrator::with_config(
        pool.clone(),
        OrchestratorConfig {
            interval_secs: config.interval_secs,
        },
    );

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received, finishing current pass..."),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    orchestrator.run().await?;
    close_pool(pool).await;

    Ok(())
}
