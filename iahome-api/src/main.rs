//! # IAHome API Server
//!
//! Gateway in front of the IAHome module backends.
//!
//! ## Architecture
//!
//! The API server is built with Axum and provides:
//! - Accounts (session JWTs), catalog and grants
//! - Module tokens validated against the live grant on every request
//! - Usage quotas with a race-free increment
//! - Reverse proxy under `/proxy/<module>/` with HTML path rewriting
//! - Edge gate for module hosts reachable directly
//! - QR code redirects and chunked uploads backed by Redis
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p iahome-api
//! ```

use iahome_api::{
    app::{build_router, AppState},
    config::Config,
};
use iahome_shared::{
    db::{
        migrations::run_migrations,
        pool::{create_pool, DatabaseConfig},
    },
    redis::{RedisClient, RedisConfig},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iahome_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("IAHome API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig {
        max_connections: config.database.max_connections,
        ..DatabaseConfig::with_url(&config.database.url)
    })
    .await?;
    run_migrations(&pool).await?;

    let redis = RedisClient::new(RedisConfig::with_url(&config.redis.url)).await?;

    let addr = config.bind_address();
    let state = AppState::new(pool, redis, config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
