/// Error handling for the API server
///
/// Every handler returns `Result<T, ApiError>`. The error renders as a JSON
/// body `{ "error": <code>, "message": <text>, "details"?: [...] }` with
/// the matching HTTP status. Internal errors are logged and replaced by a
/// generic message.
///
/// # Example
///
/// ```
/// use iahome_api::error::{ApiError, ApiResult};
/// use axum::Json;
///
/// async fn handler(found: bool) -> ApiResult<Json<&'static str>> {
///     if !found {
///         return Err(ApiError::NotFound("Module not found".to_string()));
///     }
///     Ok(Json("ok"))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use iahome_shared::access::AccessError;
use iahome_shared::auth::jwt::JwtError;
use iahome_shared::auth::module_token::ModuleTokenError;
use iahome_shared::auth::password::PasswordError;
use iahome_shared::redis::UploadSessionError;
use iahome_shared::usage::UsageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Token could not be parsed (400, code `invalid`)
    InvalidToken(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Token expired (401, code `expired`)
    Expired(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409), e.g. duplicate email
    Conflict(String),

    /// Payload too large (413)
    PayloadTooLarge(String),

    /// Unprocessable entity (422)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Internal server error (500)
    InternalError(String),

    /// Module backend unreachable or misconfigured (502)
    BadGateway(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),

    /// Module backend did not answer in time (504)
    GatewayTimeout(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "bad_request", "expired")
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation failure
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail::new(field, message)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidToken(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::Expired(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidToken(_) => "invalid",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Expired(_) => "expired",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::InternalError(_) => "internal_error",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::GatewayTimeout(_) => "gateway_timeout",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Expired(msg) => write!(f, "Expired: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::GatewayTimeout(msg) => write!(f, "Gateway timeout: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let (message, details) = match self {
            ApiError::ValidationError(errors) => {
                ("Request validation failed".to_string(), Some(errors))
            }
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), None)
            }
            ApiError::BadRequest(msg)
            | ApiError::InvalidToken(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Expired(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::GatewayTimeout(msg) => (msg, None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("email") {
                        return ApiError::Conflict("Email already exists".to_string());
                    }
                    if constraint.contains("slug") {
                        return ApiError::Conflict("Module slug already exists".to_string());
                    }
                    return ApiError::Conflict(format!("Constraint violation: {}", constraint));
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Collects `validator` field errors into a 422
impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let errors = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();

        ApiError::ValidationError(errors)
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

/// Session token failures
impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Expired("Token expired".to_string()),
            JwtError::CreateError(msg) => ApiError::InternalError(msg),
            _ => ApiError::Unauthorized(format!("Invalid token: {}", err)),
        }
    }
}

/// Only reachable when signing fails
impl From<ModuleTokenError> for ApiError {
    fn from(err: ModuleTokenError) -> Self {
        match err {
            ModuleTokenError::Signing(msg) => ApiError::InternalError(msg),
            other => AccessError::from(other).into(),
        }
    }
}

/// Module token validation failures
impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Malformed(msg) => ApiError::InvalidToken(msg),
            AccessError::Invalid(msg) => ApiError::Unauthorized(format!("Invalid token: {}", msg)),
            AccessError::Expired => ApiError::Expired("Token expired".to_string()),
            AccessError::Denied(reason) => ApiError::Forbidden(reason.message().to_string()),
            AccessError::Database(e) => e.into(),
        }
    }
}

impl From<UsageError> for ApiError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::DatabaseError(e) => e.into(),
            other => ApiError::Forbidden(other.to_string()),
        }
    }
}

impl From<UploadSessionError> for ApiError {
    fn from(err: UploadSessionError) -> Self {
        match err {
            UploadSessionError::NotFound => ApiError::NotFound(err.to_string()),
            UploadSessionError::InvalidChunkCount(_) => ApiError::invalid_field("total_chunks", err.to_string()),
            UploadSessionError::ChunkOutOfRange { .. } | UploadSessionError::MissingChunks(_) => {
                ApiError::BadRequest(err.to_string())
            }
            UploadSessionError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            UploadSessionError::Redis(e) => {
                tracing::error!(error = %e, "Upload store error");
                ApiError::ServiceUnavailable("Upload store unavailable".to_string())
            }
            UploadSessionError::Serialization(e) => {
                ApiError::InternalError(format!("Upload session metadata: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iahome_shared::access::DenyReason;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Module not found".to_string());
        assert_eq!(err.to_string(), "Not found: Module not found");
    }

    #[test]
    fn test_validation_error() {
        let err = ApiError::ValidationError(vec![
            ValidationErrorDetail::new("email", "Invalid email format"),
            ValidationErrorDetail::new("password", "Password too short"),
        ]);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_access_errors_map_to_statuses() {
        let cases = [
            (AccessError::Malformed("x".into()), StatusCode::BAD_REQUEST, "invalid"),
            (AccessError::Invalid("sig".into()), StatusCode::UNAUTHORIZED, "unauthorized"),
            (AccessError::Expired, StatusCode::UNAUTHORIZED, "expired"),
            (
                AccessError::Denied(DenyReason::QuotaExhausted),
                StatusCode::FORBIDDEN,
                "forbidden",
            ),
        ];

        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn test_gateway_errors() {
        assert_eq!(
            ApiError::BadGateway("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::GatewayTimeout("slow".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = ApiError::InternalError("password column missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "An internal error occurred");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_upload_errors() {
        let api: ApiError = UploadSessionError::MissingChunks(vec![2]).into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);

        let api: ApiError = UploadSessionError::NotFound.into();
        assert_eq!(api.status_code(), StatusCode::NOT_FOUND);

        let api: ApiError = UploadSessionError::TooLarge { max: 1024 }.into();
        assert_eq!(api.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(api.error_code(), "payload_too_large");
    }
}
