/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Register a new account
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Refresh access token
/// - `POST /v1/auth/verify-email` - Consume an email verification token
/// - `POST /v1/auth/password-reset/request` - Start a password reset
/// - `POST /v1/auth/password-reset/confirm` - Set a new password
///
/// Verification and reset tokens are written to the log instead of being
/// mailed; only their SHA-256 digests are stored.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use iahome_shared::{
    auth::{jwt, password, secret_token},
    models::profile::{CreateProfile, Profile, Role},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifetime of a password reset token
const PASSWORD_RESET_TTL_HOURS: i64 = 1;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked for strength after the length check
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub full_name: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Tokens returned by register and login
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,

    pub role: Role,

    /// Access token (24h)
    pub access_token: String,

    /// Refresh token (30d)
    pub refresh_token: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Refresh token response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// New access token (24h)
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    pub token: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn issue_session(state: &AppState, profile: &Profile) -> ApiResult<AuthResponse> {
    let role = profile.get_role();
    let access_claims = jwt::Claims::new(profile.id, role, jwt::TokenType::Access);
    let refresh_claims = jwt::Claims::new(profile.id, role, jwt::TokenType::Refresh);

    Ok(AuthResponse {
        user_id: profile.id,
        role,
        access_token: jwt::create_token(&access_claims, state.jwt_secret())?,
        refresh_token: jwt::create_token(&refresh_claims, state.jwt_secret())?,
    })
}

fn check_password_strength(candidate: &str, field: &str) -> ApiResult<()> {
    password::validate_password_strength(candidate).map_err(|msg| ApiError::invalid_field(field, msg))
}

/// Register a new account
///
/// ```text
/// POST /v1/auth/register
/// { "email": "user@example.com", "password": "s3cretpass", "full_name": "Ada" }
/// ```
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Validation failed
/// - `409 Conflict`: Email already exists
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    check_password_strength(&req.password, "password")?;

    let password_hash = password::hash_password(&req.password)?;
    let (verification_token, verification_hash) = secret_token::generate_secret_token();

    let profile = Profile::create(
        &state.db,
        CreateProfile {
            email: req.email,
            password_hash,
            full_name: req.full_name,
            role: Role::User,
            email_verification_token_hash: Some(verification_hash),
        },
    )
    .await?;

    tracing::info!(user_id = %profile.id, email = %profile.email, "Account registered");
    tracing::info!(
        email = %profile.email,
        token = %verification_token,
        "Email verification token issued"
    );

    Ok((StatusCode::CREATED, Json(issue_session(&state, &profile)?)))
}

/// Login with email and password
///
/// Unknown email, wrong password and deactivated accounts all answer the
/// same `401`.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let profile = Profile::find_by_email(&state.db, &req.email)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &profile.password_hash)? {
        tracing::debug!(user_id = %profile.id, "Login with wrong password");
        return Err(invalid());
    }

    Profile::update_last_login(&state.db, profile.id).await?;

    Ok(Json(issue_session(&state, &profile)?))
}

/// Exchanges a refresh token for a new access token
///
/// The role is re-read from the profile, so promotions and demotions apply
/// on the next refresh.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let claims = jwt::validate_refresh_token(&req.refresh_token, state.jwt_secret())?;

    let profile = Profile::find_by_id(&state.db, claims.sub)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::Unauthorized("Account not found or disabled".to_string()))?;

    let access_token =
        jwt::refresh_access_token(&req.refresh_token, profile.get_role(), state.jwt_secret())?;

    Ok(Json(RefreshResponse { access_token }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Json(req): Json<VerifyEmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let invalid = || ApiError::BadRequest("Invalid or already used verification token".to_string());

    if !secret_token::is_well_formed(&req.token) {
        return Err(invalid());
    }

    let profile = Profile::verify_email(&state.db, &secret_token::hash_secret_token(&req.token))
        .await?
        .ok_or_else(invalid)?;

    tracing::info!(user_id = %profile.id, "Email verified");

    Ok(Json(MessageResponse {
        message: "Email verified".to_string(),
    }))
}

/// Starts a password reset
///
/// Always answers `202`, whether or not the email is registered.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    req.validate()?;

    if let Some(profile) = Profile::find_by_email(&state.db, &req.email)
        .await?
        .filter(|p| p.is_active)
    {
        let (token, token_hash) = secret_token::generate_secret_token();
        let expires_at = Utc::now() + Duration::hours(PASSWORD_RESET_TTL_HOURS);

        Profile::set_password_reset(&state.db, profile.id, &token_hash, expires_at).await?;

        tracing::info!(
            email = %profile.email,
            token = %token,
            expires_at = %expires_at,
            "Password reset token issued"
        );
    } else {
        tracing::debug!("Password reset requested for unknown email");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account exists, a reset link has been sent".to_string(),
        }),
    ))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirm>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate()?;
    check_password_strength(&req.new_password, "new_password")?;

    let invalid = || ApiError::BadRequest("Invalid or expired reset token".to_string());
    if !secret_token::is_well_formed(&req.token) {
        return Err(invalid());
    }

    let new_hash = password::hash_password(&req.new_password)?;
    let profile = Profile::reset_password(
        &state.db,
        &secret_token::hash_secret_token(&req.token),
        &new_hash,
    )
    .await?
    .ok_or_else(invalid)?;

    tracing::info!(user_id = %profile.id, "Password reset completed");

    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}
