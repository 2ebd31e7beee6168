/// Redis connection handling
///
/// Wraps a `ConnectionManager`, which reconnects on its own and is cheap to
/// clone into handlers.
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisClientError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Redis command error: {0}")]
    CommandError(String),

    #[error("Redis configuration error: {0}")]
    ConfigError(String),

    #[error("Redis health check failed: {0}")]
    HealthCheckFailed(String),
}

impl From<RedisError> for RedisClientError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => RedisClientError::ConnectionError(err.to_string()),
            _ => RedisClientError::CommandError(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,

    /// Upper bound for health-check commands
    pub command_timeout_secs: u64,
}

impl RedisConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            command_timeout_secs: 5,
        }
    }

    /// Reads `REDIS_URL` (required) and `REDIS_COMMAND_TIMEOUT_SECS` (default 5)
    pub fn from_env() -> Result<Self, RedisClientError> {
        dotenvy::dotenv().ok();

        let url = env::var("REDIS_URL").map_err(|_| {
            RedisClientError::ConfigError("REDIS_URL environment variable is required".to_string())
        })?;

        let command_timeout_secs = env::var("REDIS_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            url,
            command_timeout_secs,
        })
    }
}

#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    pub async fn new(config: RedisConfig) -> Result<Self, RedisClientError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| RedisClientError::ConfigError(format!("Invalid Redis URL: {}", e)))?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            RedisClientError::ConnectionError(format!("Failed to connect to Redis: {}", e))
        })?;

        tracing::info!(url = %sanitize_url(&config.url), "Redis connected");

        Ok(Self { manager, config })
    }

    /// `PING` with a timeout; `Ok(false)` on an unexpected reply
    pub async fn ping(&self) -> Result<bool, RedisClientError> {
        let mut conn = self.manager.clone();

        let result: Result<String, RedisError> = tokio::time::timeout(
            Duration::from_secs(self.config.command_timeout_secs),
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| RedisClientError::HealthCheckFailed("PING timed out".to_string()))?;

        match result {
            Ok(pong) => Ok(pong == "PONG"),
            Err(e) => {
                tracing::error!(error = %e, "Redis health check failed");
                Err(RedisClientError::HealthCheckFailed(e.to_string()))
            }
        }
    }

    pub fn get_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Hides credentials in a Redis URL for logging
fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            format!("{}***@{}", &url[..scheme_end + 3], &url[at_pos + 1..])
        }
        _ => url.to_string(),
    }
}
