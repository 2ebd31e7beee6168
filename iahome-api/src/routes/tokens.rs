/// Module token endpoints
///
/// - `POST /v1/tokens/issue` (session) - Sign a module token for an active grant
/// - `POST /v1/tokens/validate` (public) - Check a token for a module
///
/// Validation is meant for module backends that receive users directly
/// (for example behind the edge gate) and need to confirm the token.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use iahome_shared::{
    access::check_grant,
    auth::{context::AuthContext, module_token::Permission},
    models::{
        module::Module,
        profile::Profile,
        user_application::{AccessLevel, UserApplication},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub module_slug: String,

    /// Requested lifetime; clamped to the configured bounds
    pub expires_in_secs: Option<i64>,

    /// Requested permissions; narrowed to what the grant allows
    pub permissions: Option<Vec<Permission>>,
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub module: String,
    pub permissions: Vec<Permission>,

    /// Opens the module through the proxy
    pub entry_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
    pub module_slug: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub user_id: Uuid,
    pub email: String,
    pub module: String,
    pub permissions: Vec<Permission>,
    pub expires_at: DateTime<Utc>,
    pub remaining_uses: Option<i32>,
}

/// Proxy entry URL for a freshly issued token
pub fn entry_url(public_base_url: &str, module: &str, token: &str) -> String {
    format!("{}/proxy/{}/?token={}", public_base_url, module, token)
}

pub async fn issue_token(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<IssueTokenRequest>,
) -> ApiResult<Json<IssueTokenResponse>> {
    let profile = Profile::find_by_id(&state.db, auth.user_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::Unauthorized("Account not found or disabled".to_string()))?;

    let module = Module::find_by_slug(&state.db, &req.module_slug)
        .await?
        .filter(|m| m.is_active)
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", req.module_slug)))?;

    let grant = UserApplication::find_for_module(&state.db, profile.id, &module.slug).await?;
    check_grant(grant.as_ref(), Utc::now())
        .map_err(|reason| ApiError::Forbidden(reason.message().to_string()))?;
    let access_level = grant
        .map(|g| g.get_access_level())
        .unwrap_or(AccessLevel::Basic);

    let permissions = Permission::resolve(req.permissions, access_level);
    let issued = state.token_issuer().issue(
        profile.id,
        &profile.email,
        module.id,
        &module.slug,
        permissions,
        req.expires_in_secs,
    )?;

    tracing::info!(
        user_id = %profile.id,
        module = %module.slug,
        expires_at = %issued.expires_at,
        "Module token issued"
    );

    Ok(Json(IssueTokenResponse {
        entry_url: entry_url(&state.config.api.public_base_url, &module.slug, &issued.token),
        token: issued.token,
        expires_at: issued.expires_at,
        module: module.slug,
        permissions: issued.claims.perms,
    }))
}

pub async fn validate_token(
    State(state): State<AppState>,
    Json(req): Json<ValidateTokenRequest>,
) -> ApiResult<Json<ValidateTokenResponse>> {
    let access = state
        .access_validator()
        .validate(&req.token, &req.module_slug)
        .await?;

    Ok(Json(ValidateTokenResponse {
        valid: true,
        user_id: access.claims.sub,
        expires_at: access.claims.expires_at(),
        remaining_uses: access.grant.remaining_uses(),
        email: access.claims.email,
        module: access.claims.module,
        permissions: access.claims.perms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_url() {
        assert_eq!(
            entry_url("https://iahome.fr", "whisper", "abc.def"),
            "https://iahome.fr/proxy/whisper/?token=abc.def"
        );
    }

    #[test]
    fn test_issue_request_accepts_permission_names() {
        let req: IssueTokenRequest = serde_json::from_str(
            r#"{"module_slug": "whisper", "permissions": ["read", "advanced_features"]}"#,
        )
        .unwrap();
        assert_eq!(
            req.permissions,
            Some(vec![Permission::Read, Permission::AdvancedFeatures])
        );
        assert_eq!(req.expires_in_secs, None);
    }
}
