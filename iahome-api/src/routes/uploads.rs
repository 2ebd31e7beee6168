/// Chunked uploads to module backends (session)
///
/// ```text
/// POST /v1/uploads                       { module_slug, file_name, content_type?, total_chunks }
/// PUT  /v1/uploads/:id/chunks/:index     <raw bytes>
/// POST /v1/uploads/:id/complete
/// ```
///
/// Sessions and chunks live in Redis with a TTL, so an upload can be
/// resumed on any API instance until it expires. Completion assembles the
/// file and posts it to `<backend>/upload` with an `X-File-Name` header;
/// the backend's answer is relayed as is.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    proxy::{self, ProxyError},
};
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::Response,
    Extension, Json,
};
use bytes::Bytes;
use chrono::Utc;
use iahome_shared::{
    access::check_grant,
    auth::context::AuthContext,
    models::{module::Module, user_application::UserApplication},
    redis::{NewUploadSession, UploadSession, UploadSessionStore},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Largest accepted chunk body
pub const MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

const MAX_FILE_NAME_LEN: usize = 255;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize, Validate)]
pub struct InitUploadRequest {
    #[validate(length(min = 1, max = 64, message = "Module slug must be 1-64 characters"))]
    pub module_slug: String,

    #[validate(custom(function = "validate_file_name"))]
    pub file_name: String,

    #[validate(length(max = 255, message = "Content type must be at most 255 characters"))]
    pub content_type: Option<String>,

    /// Same bounds as the session store
    #[validate(range(min = 1, max = 10000, message = "Chunk count must be between 1 and 10000"))]
    pub total_chunks: u32,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub upload_id: Uuid,
    pub total_chunks: u32,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub index: u32,
    pub received: u32,
    pub missing: u32,

    /// Bytes stored so far, against `max_bytes`
    pub stored_bytes: u64,
    pub max_bytes: u64,
}

/// Plain file name: no path separators, no control characters
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    let plain = !name.is_empty()
        && name.len() <= MAX_FILE_NAME_LEN
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control());

    if plain {
        Ok(())
    } else {
        let mut err = ValidationError::new("file_name");
        err.message = Some(Cow::Borrowed(
            "File name must be 1-255 bytes without path separators",
        ));
        Err(err)
    }
}

async fn require_grant(state: &AppState, user_id: Uuid, module_slug: &str) -> ApiResult<()> {
    let grant = UserApplication::find_for_module(&state.db, user_id, module_slug).await?;
    check_grant(grant.as_ref(), Utc::now())
        .map_err(|reason| ApiError::Forbidden(reason.message().to_string()))
}

/// Loads a session owned by the caller; other users' sessions look absent
async fn owned_session(
    store: &UploadSessionStore,
    id: Uuid,
    auth: &AuthContext,
) -> ApiResult<UploadSession> {
    let session = store.get(id).await?;
    if session.user_id != auth.user_id {
        return Err(ApiError::NotFound("Upload session not found".to_string()));
    }
    Ok(session)
}

pub async fn init_upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<InitUploadRequest>,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    req.validate()?;

    let content_type = req
        .content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    if header::HeaderValue::from_str(&content_type).is_err() {
        return Err(ApiError::invalid_field("content_type", "Invalid content type"));
    }

    let module = Module::find_by_slug(&state.db, &req.module_slug)
        .await?
        .filter(|m| m.is_active)
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", req.module_slug)))?;
    require_grant(&state, auth.user_id, &module.slug).await?;

    let store = state.upload_store();
    let session = store
        .create(NewUploadSession {
            user_id: auth.user_id,
            module_slug: module.slug,
            file_name: req.file_name,
            content_type,
            total_chunks: req.total_chunks,
        })
        .await?;

    tracing::info!(
        user_id = %auth.user_id,
        upload_id = %session.id,
        module = %session.module_slug,
        total_chunks = session.total_chunks,
        "Upload started"
    );

    Ok((
        StatusCode::CREATED,
        Json(InitUploadResponse {
            upload_id: session.id,
            total_chunks: session.total_chunks,
            expires_in_secs: store.ttl_secs(),
        }),
    ))
}

pub async fn put_chunk(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, index)): Path<(Uuid, u32)>,
    body: Bytes,
) -> ApiResult<Json<ChunkResponse>> {
    let store = state.upload_store();
    let session = owned_session(&store, id, &auth).await?;

    let stored_bytes = store.put_chunk(&session, index, body).await?;
    let missing = store.missing_chunks(&session).await?.len() as u32;

    Ok(Json(ChunkResponse {
        index,
        received: session.total_chunks - missing,
        missing,
        stored_bytes,
        max_bytes: store.max_bytes(),
    }))
}

pub async fn complete_upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let store = state.upload_store();
    let session = owned_session(&store, id, &auth).await?;

    // The grant may have lapsed while chunks were arriving
    require_grant(&state, auth.user_id, &session.module_slug).await?;

    let file = store.assemble(&session).await?;
    let backend = proxy::backend_url(&state, &session.module_slug).await?;
    let url = format!("{}/upload", backend);

    let mut headers = reqwest::header::HeaderMap::new();
    let file_name = reqwest::header::HeaderValue::from_bytes(session.file_name.as_bytes())
        .map_err(|_| ApiError::invalid_field("file_name", "File name cannot be sent as a header"))?;
    headers.insert("x-file-name", file_name);
    if let Ok(content_type) = reqwest::header::HeaderValue::from_str(&session.content_type) {
        headers.insert(reqwest::header::CONTENT_TYPE, content_type);
    }

    let size = file.len();
    let upstream = proxy::send_upstream(&state.http, &Method::POST, &url, headers, file)
        .await
        .map_err(|e: ProxyError| {
            tracing::warn!(upload_id = %session.id, url = %url, error = %e, "Upload forward failed");
            e
        })?;

    if upstream.status.is_success() {
        store.delete(&session).await?;
        tracing::info!(
            user_id = %auth.user_id,
            upload_id = %session.id,
            module = %session.module_slug,
            bytes = size,
            "Upload delivered"
        );
    } else {
        tracing::warn!(
            upload_id = %session.id,
            status = upstream.status.as_u16(),
            "Backend rejected upload; session kept for retry"
        );
    }

    Ok(proxy::into_client_response(upstream, None))
}
