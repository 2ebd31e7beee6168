/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default 10)
/// - `WORKER_INTERVAL_SECS`: pause between maintenance passes (default 60)

use std::env;

/// Default pause between maintenance passes
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub interval_secs: u64,
}

impl WorkerConfig {
    /// Loads configuration from environment variables (and `.env`)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()?;

        let interval_secs = parse_interval(env::var("WORKER_INTERVAL_SECS").ok().as_deref())?;

        Ok(Self {
            database_url,
            max_connections,
            interval_secs,
        })
    }
}

fn parse_interval(raw: Option<&str>) -> anyhow::Result<u64> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_INTERVAL_SECS);
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => anyhow::bail!("WORKER_INTERVAL_SECS must be at least 1"),
        Ok(secs) => Ok(secs),
        Err(e) => anyhow::bail!("WORKER_INTERVAL_SECS has an invalid value: {}", e),
    }
}
