/// Admin endpoints (session + admin role)
///
/// - `POST /v1/admin/modules` - Create a catalog module
/// - `PUT /v1/admin/modules/:id` - Partially update a module
/// - `POST /v1/admin/applications` - Grant a module to a user
///
/// Granting is the only way to give access to a paid module.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{validate_http_scheme, validate_slug},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Duration, Utc};
use iahome_shared::{
    auth::context::AuthContext,
    models::{
        module::{CreateModule, Module, UpdateModule},
        profile::Profile,
        user_application::{AccessLevel, ActivateGrant, UserApplication},
    },
};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;
use validator::Validate;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateModuleRequest {
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,

    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_category")]
    #[validate(length(min = 1, max = 64, message = "Category must be 1-64 characters"))]
    pub category: String,

    #[serde(default)]
    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price_cents: i64,

    /// Backend base URL, used when no `<SLUG>_SERVICE_URL` is set
    #[validate(
        url(message = "Backend URL must be a valid URL"),
        custom(function = "validate_http_scheme")
    )]
    pub url: Option<String>,

    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,

    #[validate(range(min = 1, message = "Quota must be positive"))]
    pub default_max_usage: Option<i32>,

    #[validate(range(min = 1, message = "Validity must be a positive number of days"))]
    pub default_access_days: Option<i32>,
}

impl From<CreateModuleRequest> for CreateModule {
    fn from(req: CreateModuleRequest) -> Self {
        Self {
            slug: req.slug,
            title: req.title,
            description: req.description,
            category: req.category,
            price_cents: req.price_cents,
            url: req.url,
            image_url: req.image_url,
            default_max_usage: req.default_max_usage,
            default_access_days: req.default_access_days,
        }
    }
}

/// Partial module update; `null` clears a nullable column
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateModuleRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    pub description: Option<String>,

    #[validate(length(min = 1, max = 64, message = "Category must be 1-64 characters"))]
    pub category: Option<String>,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price_cents: Option<i64>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(
        url(message = "Backend URL must be a valid URL"),
        custom(function = "validate_http_scheme")
    )]
    pub url: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<Option<String>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 1, message = "Quota must be positive"))]
    pub default_max_usage: Option<Option<i32>>,

    #[serde(default, deserialize_with = "nullable")]
    #[validate(range(min = 1, message = "Validity must be a positive number of days"))]
    pub default_access_days: Option<Option<i32>>,

    pub is_active: Option<bool>,
}

impl From<UpdateModuleRequest> for UpdateModule {
    fn from(req: UpdateModuleRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            category: req.category,
            price_cents: req.price_cents,
            url: req.url,
            image_url: req.image_url,
            default_max_usage: req.default_max_usage,
            default_access_days: req.default_access_days,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, max = 64, message = "Module slug must be 1-64 characters"))]
    pub module_slug: String,

    /// Defaults to `basic`
    pub access_level: Option<AccessLevel>,

    /// Overrides the module's default quota
    #[validate(range(min = 1, message = "Quota must be positive"))]
    pub max_usage: Option<i32>,

    /// Overrides the module's default validity
    #[validate(range(min = 1, message = "Validity must be a positive number of days"))]
    pub access_days: Option<i32>,
}

pub async fn create_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateModuleRequest>,
) -> ApiResult<(StatusCode, Json<Module>)> {
    req.validate()?;

    let module = Module::create(&state.db, req.into()).await?;

    tracing::info!(
        admin_id = %auth.user_id,
        module_id = %module.id,
        slug = %module.slug,
        "Module created"
    );

    Ok((StatusCode::CREATED, Json(module)))
}

pub async fn update_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateModuleRequest>,
) -> ApiResult<Json<Module>> {
    req.validate()?;

    let update = UpdateModule::from(req);
    if update.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".to_string()));
    }

    let module = Module::update(&state.db, id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Module not found".to_string()))?;

    tracing::info!(admin_id = %auth.user_id, module_id = %module.id, "Module updated");

    Ok(Json(module))
}

/// Creates or re-activates a grant, resetting its usage
pub async fn grant_application(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<(StatusCode, Json<UserApplication>)> {
    req.validate()?;

    let profile = Profile::find_by_id(&state.db, req.user_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let module = Module::find_by_slug(&state.db, &req.module_slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", req.module_slug)))?;

    let mut grant = ActivateGrant::from_module_defaults(
        profile.id,
        &module,
        req.access_level.unwrap_or(AccessLevel::Basic),
    );
    if let Some(max_usage) = req.max_usage {
        grant.max_usage = Some(max_usage);
    }
    if let Some(days) = req.access_days {
        grant.expires_at = Some(Utc::now() + Duration::days(i64::from(days)));
    }

    let application = UserApplication::activate(&state.db, grant).await?;

    tracing::info!(
        admin_id = %auth.user_id,
        user_id = %profile.id,
        module = %module.slug,
        access_level = %application.access_level,
        "Module granted"
    );

    Ok((StatusCode::CREATED, Json(application)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_distinguishes_null() {
        let req: UpdateModuleRequest =
            serde_json::from_str(r#"{"url": null, "title": "Whisper"}"#).unwrap();
        assert_eq!(req.url, Some(None));
        assert_eq!(req.image_url, None);
        assert_eq!(req.title.as_deref(), Some("Whisper"));

        let update = UpdateModule::from(req);
        assert!(!update.is_empty());
    }

    #[test]
    fn test_create_request_validation() {
        let req: CreateModuleRequest = serde_json::from_value(serde_json::json!({
            "slug": "Bad Slug",
            "title": "",
            "price_cents": -1,
            "url": "ftp://x",
            "default_max_usage": 0,
            "default_access_days": -3,
        }))
        .unwrap();

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        for field in ["slug", "title", "price_cents", "url", "default_max_usage", "default_access_days"] {
            assert!(fields.contains_key(field), "{} should be rejected", field);
        }

        let req: CreateModuleRequest = serde_json::from_value(serde_json::json!({
            "slug": "whisper",
            "title": "Whisper",
            "url": "http://whisper:8092",
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.category, "general");
    }

    #[test]
    fn test_update_request_validation() {
        // Clearing a column is always allowed
        let req: UpdateModuleRequest =
            serde_json::from_str(r#"{"url": null, "default_max_usage": null}"#).unwrap();
        assert!(req.validate().is_ok());

        let req: UpdateModuleRequest =
            serde_json::from_str(r#"{"url": "javascript:alert(1)", "default_max_usage": 0}"#).unwrap();
        let api: ApiError = req.validate().unwrap_err().into();
        match api {
            ApiError::ValidationError(details) => {
                assert!(details.iter().any(|d| d.field == "url"));
                assert!(details.iter().any(|d| d.field == "default_max_usage"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_grant_request_validation() {
        let req: GrantRequest = serde_json::from_value(serde_json::json!({
            "user_id": Uuid::nil(),
            "module_slug": "whisper",
            "max_usage": 0,
        }))
        .unwrap();
        assert!(req.validate().unwrap_err().field_errors().contains_key("max_usage"));
    }
}
