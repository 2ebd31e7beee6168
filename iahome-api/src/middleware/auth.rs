/// Session authentication middleware
///
/// `jwt_auth_layer` validates the `Authorization: Bearer <access token>`
/// header and stores an [`AuthContext`] in the request extensions.
/// `require_admin` must run after it and refuses non-admin callers.
///
/// Module tokens are not accepted here: they carry an audience and none of
/// the session claims, so [`jwt::validate_access_token`] rejects them.

use crate::{app::AppState, error::ApiError};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use iahome_shared::auth::{context::AuthContext, jwt};

/// Bearer token from the `Authorization` header
pub fn bearer_token(req: &Request) -> Result<&str, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Expected Bearer token".to_string()))
}

pub async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = jwt::validate_access_token(bearer_token(&req)?, state.jwt_secret())?;

    req.extensions_mut().insert(AuthContext::from_claims(&claims));

    Ok(next.run(req).await)
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let auth = req
        .extensions()
        .get::<AuthContext>()
        .copied()
        .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

    if !auth.is_admin() {
        tracing::warn!(user_id = %auth.user_id, "Admin route refused");
        return Err(ApiError::Forbidden("Admin role required".to_string()));
    }

    Ok(next.run(req).await)
}
