/// QR codes
///
/// - `GET /v1/qr` (session) - Own codes with scan stats
/// - `POST /v1/qr` (session) - Create a code for an http(s) destination
/// - `DELETE /v1/qr/:id` (session, owner) - Deactivate a code
/// - `GET /qr/:code` (public) - Count one scan and redirect

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::validate_http_scheme,
};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use iahome_shared::{
    auth::context::AuthContext,
    models::qr_code::{is_valid_code, CreateQrCode, QrCode},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQrRequest {
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    #[validate(
        length(max = 2048, message = "Destination must be at most 2048 characters"),
        url(message = "Destination must be a valid URL"),
        custom(function = "validate_http_scheme")
    )]
    pub destination_url: String,
}

#[derive(Debug, Serialize)]
pub struct QrCodeResponse {
    pub id: Uuid,
    pub code: String,
    pub name: Option<String>,
    pub destination_url: String,

    /// Public URL to encode in the QR image
    pub scan_url: String,

    pub scans: i64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl QrCodeResponse {
    fn new(qr: QrCode, public_base_url: &str) -> Self {
        Self {
            scan_url: format!("{}/qr/{}", public_base_url, qr.code),
            id: qr.id,
            code: qr.code,
            name: qr.name,
            destination_url: qr.destination_url,
            scans: qr.scans,
            last_scan_at: qr.last_scan_at,
            is_active: qr.is_active,
            created_at: qr.created_at,
        }
    }
}

pub async fn list_qr_codes(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<QrCodeResponse>>> {
    let codes = QrCode::list_by_user(&state.db, auth.user_id).await?;
    let base = &state.config.api.public_base_url;

    Ok(Json(
        codes
            .into_iter()
            .map(|qr| QrCodeResponse::new(qr, base))
            .collect(),
    ))
}

pub async fn create_qr_code(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateQrRequest>,
) -> ApiResult<(StatusCode, Json<QrCodeResponse>)> {
    req.validate()?;

    let qr = QrCode::create(
        &state.db,
        CreateQrCode {
            user_id: auth.user_id,
            name: req.name.filter(|n| !n.trim().is_empty()),
            destination_url: req.destination_url.trim().to_string(),
        },
    )
    .await?;

    tracing::info!(user_id = %auth.user_id, code = %qr.code, "QR code created");

    Ok((
        StatusCode::CREATED,
        Json(QrCodeResponse::new(qr, &state.config.api.public_base_url)),
    ))
}

pub async fn delete_qr_code(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !QrCode::deactivate(&state.db, id, auth.user_id).await? {
        return Err(ApiError::NotFound("QR code not found".to_string()));
    }

    tracing::info!(user_id = %auth.user_id, qr_id = %id, "QR code deactivated");

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /qr/:code`: one scan per hit, then `302` to the destination
pub async fn redirect_qr_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Response> {
    if !is_valid_code(&code) {
        return Err(ApiError::NotFound("QR code not found".to_string()));
    }

    let qr = QrCode::record_scan(&state.db, &code)
        .await?
        .ok_or_else(|| ApiError::NotFound("QR code not found".to_string()))?;

    tracing::debug!(code = %qr.code, scans = qr.scans, "QR code scanned");

    Ok((StatusCode::FOUND, [(header::LOCATION, qr.destination_url)]).into_response())
}
