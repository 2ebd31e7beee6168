/// The caller's own grants (session)
///
/// - `GET /v1/applications` - List grants with their evaluated status
/// - `POST /v1/applications/activate` - Activate a free module
/// - `POST /v1/applications/:id/deactivate` - Switch off one of your grants

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use iahome_shared::{
    auth::context::AuthContext,
    models::{
        module::Module,
        user_application::{AccessLevel, ActivateGrant, GrantStatus, UserApplication},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A grant plus what it currently allows
#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    #[serde(flatten)]
    pub grant: UserApplication,
    pub status: GrantStatus,
    pub remaining_uses: Option<i32>,
}

impl From<UserApplication> for ApplicationResponse {
    fn from(grant: UserApplication) -> Self {
        Self {
            status: grant.status(),
            remaining_uses: grant.remaining_uses(),
            grant,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub module_slug: String,
}

pub async fn list_applications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<ApplicationResponse>>> {
    let grants = UserApplication::list_by_user(&state.db, auth.user_id).await?;

    Ok(Json(grants.into_iter().map(ApplicationResponse::from).collect()))
}

/// Activates a free module with its default quota and validity
///
/// An already usable grant is returned as is (`200`). A grant the user
/// switched off comes back with its usage count and expiry unchanged
/// (`201`). An expired grant starts a new period with the module defaults
/// (`201`). A grant with no uses left is never renewed here, even after a
/// deactivation; only an admin grant resets its quota.
///
/// # Errors
///
/// - `404 Not Found`: Unknown or inactive module
/// - `403 Forbidden`: Paid module, or quota exhausted
pub async fn activate_application(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ActivateRequest>,
) -> ApiResult<(StatusCode, Json<ApplicationResponse>)> {
    let module = Module::find_by_slug(&state.db, &req.module_slug)
        .await?
        .filter(|m| m.is_active)
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", req.module_slug)))?;

    if !module.is_free() {
        return Err(ApiError::Forbidden(
            "This module is not free; access is granted after purchase".to_string(),
        ));
    }

    if let Some(existing) =
        UserApplication::find_for_module(&state.db, auth.user_id, &module.slug).await?
    {
        let now = Utc::now();
        match existing.status_at(now) {
            GrantStatus::Active => return Ok((StatusCode::OK, Json(existing.into()))),
            GrantStatus::Expired => {}
            GrantStatus::Inactive if existing.is_expired_at(now) => {}
            GrantStatus::QuotaExhausted => return Err(quota_exhausted()),
            GrantStatus::Inactive => {
                // None when the quota was spent before the deactivation
                let grant = UserApplication::reactivate(&state.db, existing.id)
                    .await?
                    .ok_or_else(quota_exhausted)?;

                tracing::info!(
                    user_id = %auth.user_id,
                    module = %module.slug,
                    usage_count = grant.usage_count,
                    "Free module reactivated"
                );

                return Ok((StatusCode::CREATED, Json(grant.into())));
            }
        }
    }

    let grant = UserApplication::activate(
        &state.db,
        ActivateGrant::from_module_defaults(auth.user_id, &module, AccessLevel::Basic),
    )
    .await?;

    tracing::info!(
        user_id = %auth.user_id,
        module = %module.slug,
        max_usage = ?grant.max_usage,
        expires_at = ?grant.expires_at,
        "Free module activated"
    );

    Ok((StatusCode::CREATED, Json(grant.into())))
}

fn quota_exhausted() -> ApiError {
    ApiError::Forbidden("Usage quota exhausted for this module".to_string())
}

pub async fn deactivate_application(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let grant = UserApplication::find_by_id(&state.db, id)
        .await?
        .filter(|g| auth.can_access(g.user_id))
        .ok_or_else(|| ApiError::NotFound("Application not found".to_string()))?;

    if !UserApplication::deactivate(&state.db, grant.id).await? {
        return Err(ApiError::Conflict("Application already inactive".to_string()));
    }

    tracing::info!(user_id = %auth.user_id, grant_id = %grant.id, module = %grant.module_slug, "Application deactivated");

    Ok(StatusCode::NO_CONTENT)
}
