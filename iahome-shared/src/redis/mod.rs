/// Redis integration
///
/// Redis holds the short-lived state that must survive restarts and be
/// shared between API instances: chunked-upload sessions.
///
/// # Key layout
///
/// ```text
/// upload:{id}:meta          JSON UploadSession   (TTL = UPLOAD_SESSION_TTL_SECS)
/// upload:{id}:chunk:{n}     raw chunk bytes      (same TTL)
/// ```
///
/// # Example
///
/// ```no_run
/// use iahome_shared::redis::client::{RedisClient, RedisConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RedisClient::new(RedisConfig::from_env()?).await?;
/// println!("Redis healthy: {}", client.ping().await?);
/// # Ok(())
/// # }
/// ```

pub mod client;
pub mod upload_sessions;

pub use client::{RedisClient, RedisClientError, RedisConfig};
pub use upload_sessions::{NewUploadSession, UploadSession, UploadSessionError, UploadSessionStore};
