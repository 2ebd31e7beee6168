/// Chunked-upload sessions stored in Redis
///
/// A client opens a session, `PUT`s numbered chunks in any order (re-sending
/// a chunk overwrites it), then completes the session.
///
/// # Keys
///
/// ```text
/// upload:{id}:meta     JSON metadata
/// upload:{id}:chunks   hash: "<index>" → chunk bytes, "bytes" → running total
/// ```
///
/// Both keys carry the session TTL and every chunk write refreshes both, so
/// early chunks live as long as the session and an abandoned upload
/// disappears on its own. The chunk write runs as one Lua script that keeps
/// the running total under the store's size limit.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use iahome_shared::redis::{NewUploadSession, RedisClient, RedisConfig, UploadSessionStore};
/// use uuid::Uuid;
///
/// # async fn example(user_id: Uuid) -> anyhow::Result<()> {
/// let client = RedisClient::new(RedisConfig::from_env()?).await?;
/// let store = UploadSessionStore::new(client.get_connection(), 3600, 64 * 1024 * 1024);
///
/// let session = store
///     .create(NewUploadSession {
///         user_id,
///         module_slug: "whisper".to_string(),
///         file_name: "talk.mp3".to_string(),
///         content_type: "audio/mpeg".to_string(),
///         total_chunks: 2,
///     })
///     .await?;
///
/// store.put_chunk(&session, 0, Bytes::from_static(b"hello ")).await?;
/// store.put_chunk(&session, 1, Bytes::from_static(b"world")).await?;
/// let file = store.assemble(&session).await?;
/// assert_eq!(&file[..], b"hello world");
/// store.delete(&session).await?;
/// # Ok(())
/// # }
/// ```

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::RedisError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest chunk count a session may declare
pub const MAX_CHUNKS: u32 = 10_000;

/// Hash field holding the running byte total
const BYTES_FIELD: &str = "bytes";

const PUT_CHUNK_SCRIPT: &str = r#"
local meta = KEYS[1]
local chunks = KEYS[2]
local index = ARGV[1]
local data = ARGV[2]
local ttl = tonumber(ARGV[3])
local max_bytes = tonumber(ARGV[4])
local bytes_field = ARGV[5]

if redis.call('EXISTS', meta) == 0 then
    return -1
end

local previous = redis.call('HSTRLEN', chunks, index)
local total = tonumber(redis.call('HGET', chunks, bytes_field) or '0')
total = total - previous + string.len(data)
if total > max_bytes then
    return -2
end

redis.call('HSET', chunks, index, data, bytes_field, total)
redis.call('EXPIRE', chunks, ttl)
redis.call('EXPIRE', meta, ttl)
return total
"#;

#[derive(Debug, thiserror::Error)]
pub enum UploadSessionError {
    #[error("Upload session not found or expired")]
    NotFound,

    #[error("Chunk count must be between 1 and {max}, got {0}", max = MAX_CHUNKS)]
    InvalidChunkCount(u32),

    #[error("Chunk index {index} out of range (0..{total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Missing chunks: {0:?}")]
    MissingChunks(Vec<u32>),

    #[error("Upload exceeds the {max} byte limit")]
    TooLarge { max: u64 },

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Corrupt session metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Session metadata as stored under `upload:{id}:meta`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_slug: String,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    fn meta_key(&self) -> String {
        meta_key(self.id)
    }

    fn chunks_key(&self) -> String {
        format!("upload:{}:chunks", self.id)
    }

    fn chunk_fields(&self) -> Vec<String> {
        (0..self.total_chunks).map(|i| i.to_string()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewUploadSession {
    pub user_id: Uuid,
    pub module_slug: String,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
}

fn meta_key(id: Uuid) -> String {
    format!("upload:{}:meta", id)
}

#[derive(Clone)]
pub struct UploadSessionStore {
    conn: ConnectionManager,
    ttl_secs: u64,
    max_bytes: u64,
}

impl UploadSessionStore {
    /// `max_bytes` caps the sum of all chunks of one session
    pub fn new(conn: ConnectionManager, ttl_secs: u64, max_bytes: u64) -> Self {
        Self {
            conn,
            ttl_secs,
            max_bytes,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn create(&self, new: NewUploadSession) -> Result<UploadSession, UploadSessionError> {
        if new.total_chunks == 0 || new.total_chunks > MAX_CHUNKS {
            return Err(UploadSessionError::InvalidChunkCount(new.total_chunks));
        }

        let session = UploadSession {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            module_slug: new.module_slug,
            file_name: new.file_name,
            content_type: new.content_type,
            total_chunks: new.total_chunks,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&session)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(session.meta_key())
            .arg(json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;

        tracing::debug!(
            session_id = %session.id,
            module = %session.module_slug,
            total_chunks = session.total_chunks,
            "Upload session created"
        );

        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<UploadSession, UploadSessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(meta_key(id))
            .query_async(&mut conn)
            .await?;

        let raw = raw.ok_or(UploadSessionError::NotFound)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Stores chunk `index`, overwriting any previous upload of it
    ///
    /// Returns the session's stored byte total after the write.
    pub async fn put_chunk(
        &self,
        session: &UploadSession,
        index: u32,
        data: Bytes,
    ) -> Result<u64, UploadSessionError> {
        if index >= session.total_chunks {
            return Err(UploadSessionError::ChunkOutOfRange {
                index,
                total: session.total_chunks,
            });
        }
        if data.len() as u64 > self.max_bytes {
            return Err(UploadSessionError::TooLarge { max: self.max_bytes });
        }

        let mut conn = self.conn.clone();
        let total: i64 = redis::Script::new(PUT_CHUNK_SCRIPT)
            .key(session.meta_key())
            .key(session.chunks_key())
            .arg(index)
            .arg(&data[..])
            .arg(self.ttl_secs)
            .arg(self.max_bytes)
            .arg(BYTES_FIELD)
            .invoke_async(&mut conn)
            .await?;

        match total {
            -1 => Err(UploadSessionError::NotFound),
            -2 => {
                tracing::debug!(session_id = %session.id, index, "Chunk rejected, size limit reached");
                Err(UploadSessionError::TooLarge { max: self.max_bytes })
            }
            total => Ok(total as u64),
        }
    }

    /// Indexes of chunks not yet received, ascending
    pub async fn missing_chunks(&self, session: &UploadSession) -> Result<Vec<u32>, UploadSessionError> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = redis::cmd("HKEYS")
            .arg(session.chunks_key())
            .query_async(&mut conn)
            .await?;

        let mut present = vec![false; session.total_chunks as usize];
        for index in fields.iter().filter_map(|f| f.parse::<usize>().ok()) {
            if let Some(slot) = present.get_mut(index) {
                *slot = true;
            }
        }

        Ok(present
            .into_iter()
            .enumerate()
            .filter(|(_, received)| !received)
            .map(|(i, _)| i as u32)
            .collect())
    }

    /// Concatenates all chunks in index order
    ///
    /// Fails with `MissingChunks` when any chunk is absent.
    pub async fn assemble(&self, session: &UploadSession) -> Result<Bytes, UploadSessionError> {
        let mut conn = self.conn.clone();
        let chunks: Vec<Option<Vec<u8>>> = redis::cmd("HMGET")
            .arg(session.chunks_key())
            .arg(session.chunk_fields())
            .query_async(&mut conn)
            .await?;

        let missing: Vec<u32> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i as u32)
            .collect();
        if !missing.is_empty() {
            return Err(UploadSessionError::MissingChunks(missing));
        }

        let total_len = chunks.iter().flatten().map(Vec::len).sum();
        let mut file = BytesMut::with_capacity(total_len);
        for chunk in chunks.into_iter().flatten() {
            file.extend_from_slice(&chunk);
        }

        Ok(file.freeze())
    }

    /// Removes the session and all of its chunks
    pub async fn delete(&self, session: &UploadSession) -> Result<(), UploadSessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(session.meta_key())
            .arg(session.chunks_key())
            .query_async::<_, ()>(&mut conn)
            .await?;

        tracing::debug!(session_id = %session.id, "Upload session deleted");
        Ok(())
    }
}
