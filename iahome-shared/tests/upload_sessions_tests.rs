/// Redis-backed tests for the chunked-upload session store
///
/// Require a running Redis (REDIS_URL). Every test opens its own session.

use bytes::Bytes;
use iahome_shared::redis::{
    NewUploadSession, RedisClient, RedisConfig, UploadSession, UploadSessionError,
    UploadSessionStore,
};
use uuid::Uuid;

const TTL_SECS: u64 = 300;
const MAX_BYTES: u64 = 1024;

async fn setup() -> (RedisClient, UploadSessionStore) {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let client = RedisClient::new(RedisConfig::with_url(url))
        .await
        .expect("Failed to connect to Redis");
    let store = UploadSessionStore::new(client.get_connection(), TTL_SECS, MAX_BYTES);
    (client, store)
}

async fn open(store: &UploadSessionStore, total_chunks: u32) -> UploadSession {
    store
        .create(NewUploadSession {
            user_id: Uuid::new_v4(),
            module_slug: "whisper".to_string(),
            file_name: "talk.wav".to_string(),
            content_type: "audio/wav".to_string(),
            total_chunks,
        })
        .await
        .expect("Failed to create session")
}

async fn ttl(client: &RedisClient, key: &str) -> i64 {
    let mut conn = client.get_connection();
    redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
async fn test_chunks_assemble_in_index_order() {
    let (_client, store) = setup().await;
    let session = open(&store, 3).await;

    store.put_chunk(&session, 2, Bytes::from_static(b"gamma")).await.unwrap();
    store.put_chunk(&session, 0, Bytes::from_static(b"alpha-")).await.unwrap();
    assert_eq!(store.missing_chunks(&session).await.unwrap(), vec![1]);

    let result = store.assemble(&session).await;
    assert!(matches!(result, Err(UploadSessionError::MissingChunks(ref m)) if m == &vec![1]));

    store.put_chunk(&session, 1, Bytes::from_static(b"beta-")).await.unwrap();
    assert!(store.missing_chunks(&session).await.unwrap().is_empty());

    let file = store.assemble(&session).await.unwrap();
    assert_eq!(&file[..], b"alpha-beta-gamma");

    store.delete(&session).await.unwrap();
    assert!(matches!(
        store.get(session.id).await,
        Err(UploadSessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_chunk_write_refreshes_every_chunk_ttl() {
    let (client, store) = setup().await;
    let session = open(&store, 2).await;
    let chunks_key = format!("upload:{}:chunks", session.id);

    store.put_chunk(&session, 0, Bytes::from_static(b"first")).await.unwrap();

    // Age the stored chunks as if the upload had been slow
    let mut conn = client.get_connection();
    redis::cmd("EXPIRE")
        .arg(&chunks_key)
        .arg(5)
        .query_async::<_, ()>(&mut conn)
        .await
        .unwrap();
    assert!(ttl(&client, &chunks_key).await <= 5);

    store.put_chunk(&session, 1, Bytes::from_static(b"second")).await.unwrap();
    assert!(ttl(&client, &chunks_key).await > 5);
    assert!(ttl(&client, &format!("upload:{}:meta", session.id)).await > 5);

    let file = store.assemble(&session).await.unwrap();
    assert_eq!(&file[..], b"firstsecond");

    store.delete(&session).await.unwrap();
}

#[tokio::test]
async fn test_stored_bytes_are_capped() {
    let (_client, store) = setup().await;
    let session = open(&store, 3).await;
    let chunk = |len: usize| Bytes::from(vec![b'x'; len]);

    assert_eq!(store.put_chunk(&session, 0, chunk(600)).await.unwrap(), 600);

    // Re-sending a chunk replaces its size instead of adding to it
    assert_eq!(store.put_chunk(&session, 0, chunk(600)).await.unwrap(), 600);

    let result = store.put_chunk(&session, 1, chunk(600)).await;
    assert!(matches!(result, Err(UploadSessionError::TooLarge { max: 1024 })));
    assert_eq!(store.missing_chunks(&session).await.unwrap(), vec![1, 2]);

    assert_eq!(store.put_chunk(&session, 1, chunk(424)).await.unwrap(), 1024);
    let result = store.put_chunk(&session, 2, chunk(1)).await;
    assert!(matches!(result, Err(UploadSessionError::TooLarge { .. })));

    let result = store.put_chunk(&session, 2, chunk(2048)).await;
    assert!(matches!(result, Err(UploadSessionError::TooLarge { .. })));

    store.delete(&session).await.unwrap();
}

#[tokio::test]
async fn test_chunk_for_expired_session_is_not_stored() {
    let (client, store) = setup().await;
    let session = open(&store, 1).await;

    let mut conn = client.get_connection();
    redis::cmd("DEL")
        .arg(format!("upload:{}:meta", session.id))
        .query_async::<_, ()>(&mut conn)
        .await
        .unwrap();

    let result = store.put_chunk(&session, 0, Bytes::from_static(b"late")).await;
    assert!(matches!(result, Err(UploadSessionError::NotFound)));

    let exists: bool = redis::cmd("EXISTS")
        .arg(format!("upload:{}:chunks", session.id))
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!exists);
}
