/// Usage recording from inside a module
///
/// ```text
/// POST /v1/usage/record
/// Authorization: Bearer <module token>
/// { "module_slug": "whisper" }      // optional, defaults to the token's module
/// ```
///
/// Counts one tool invocation against the grant behind the token. The
/// increment is a single conditional `UPDATE`, so concurrent calls never
/// push `usage_count` past `max_usage`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::bearer_token,
};
use axum::{
    extract::{Request, State},
    Json,
};
use iahome_shared::usage::UsageOutcome;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RecordUsageRequest {
    pub module_slug: Option<String>,
}

pub async fn record_usage(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UsageOutcome>> {
    let token = bearer_token(&req)?.to_string();

    let body = axum::body::to_bytes(req.into_body(), 64 * 1024)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read body: {}", e)))?;
    let body: RecordUsageRequest = if body.is_empty() {
        RecordUsageRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };

    let validator = state.access_validator();
    let module = match body.module_slug {
        Some(slug) => slug,
        None => validator.decode(&token)?.module,
    };

    let access = validator.validate(&token, &module).await?;
    let outcome = state
        .usage_counter()
        .record(access.claims.sub, &module)
        .await?;

    tracing::info!(
        user_id = %access.claims.sub,
        module = %module,
        usage_count = outcome.usage_count,
        remaining = ?outcome.remaining,
        exhausted = outcome.exhausted,
        "Usage recorded"
    );

    Ok(Json(outcome))
}
