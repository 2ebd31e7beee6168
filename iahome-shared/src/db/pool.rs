/// PostgreSQL connection pool
///
/// Every IAHome process (API server, maintenance worker, integration tests)
/// talks to the database through one `PgPool` built here. The pool is
/// verified with a `SELECT 1` before it is handed out so that a bad
/// `DATABASE_URL` fails at startup instead of on the first request.
///
/// # Example
///
/// ```no_run
/// use iahome_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
/// let stats = iahome_shared::db::pool::get_pool_stats(&pool);
/// println!("{} connections open", stats.total_connections);
/// # Ok(())
/// # }
/// ```

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pool configuration
///
/// Timeouts are expressed in seconds so they map directly onto environment
/// variables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Upper bound on open connections (default 10)
    pub max_connections: u32,

    /// Connections kept warm while idle (default 1)
    pub min_connections: u32,

    /// How long `acquire` waits for a free connection (default 10s)
    pub acquire_timeout_seconds: u64,

    /// Idle connections older than this are closed (default 10 minutes)
    pub idle_timeout_seconds: Option<u64>,

    /// Connections are recycled after this lifetime (default 30 minutes)
    pub max_lifetime_seconds: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 10,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
        }
    }
}

impl DatabaseConfig {
    /// Builds a configuration with defaults for everything but the URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Reads `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()?;

        Ok(Self {
            url,
            max_connections,
            ..Default::default()
        })
    }
}

/// Creates the pool and runs a health check against it
///
/// # Errors
///
/// Returns an error if the URL is invalid, the server is unreachable, or the
/// health check fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

    if let Some(idle) = config.idle_timeout_seconds {
        options = options.idle_timeout(Duration::from_secs(idle));
    }

    if let Some(lifetime) = config.max_lifetime_seconds {
        options = options.max_lifetime(Duration::from_secs(lifetime));
    }

    let pool = options.connect(&config.url).await?;
    health_check(&pool).await?;

    info!("Database connection pool ready");
    Ok(pool)
}

/// Runs `SELECT 1` against the pool
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    let (value,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;

    if value != 1 {
        warn!(value, "Database health check returned unexpected value");
        return Err(sqlx::Error::Protocol(
            "Health check returned unexpected value".into(),
        ));
    }

    debug!("Database health check passed");
    Ok(())
}

/// Snapshot of pool utilisation, reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently checked out
    pub active_connections: usize,

    /// Connections idle in the pool
    pub idle_connections: usize,

    /// All open connections
    pub total_connections: usize,
}

pub fn get_pool_stats(pool: &PgPool) -> PoolStats {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    PoolStats {
        active_connections: size.saturating_sub(idle),
        idle_connections: idle,
        total_connections: size,
    }
}

/// Closes every connection; call on shutdown
pub async fn close_pool(pool: PgPool) {
    info!("Closing database connection pool");
    pool.close().await;
}
