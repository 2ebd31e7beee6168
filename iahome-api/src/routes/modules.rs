/// Public module catalog
///
/// - `GET /v1/modules?category=ai` - Active modules, ordered by title
/// - `GET /v1/modules/:slug` - One active module
///
/// Backend URLs are internal and never listed here.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use iahome_shared::models::module::Module;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListModulesQuery {
    pub category: Option<String>,
}

/// Catalog view of a module
#[derive(Debug, Serialize)]
pub struct ModuleResponse {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub is_free: bool,
    pub image_url: Option<String>,
    pub default_max_usage: Option<i32>,
    pub default_access_days: Option<i32>,
}

impl From<Module> for ModuleResponse {
    fn from(module: Module) -> Self {
        Self {
            is_free: module.is_free(),
            id: module.id,
            slug: module.slug,
            title: module.title,
            description: module.description,
            category: module.category,
            price_cents: module.price_cents,
            image_url: module.image_url,
            default_max_usage: module.default_max_usage,
            default_access_days: module.default_access_days,
        }
    }
}

pub async fn list_modules(
    State(state): State<AppState>,
    Query(query): Query<ListModulesQuery>,
) -> ApiResult<Json<Vec<ModuleResponse>>> {
    let category = query.category.as_deref().filter(|c| !c.is_empty());
    let modules = Module::list_active(&state.db, category).await?;

    Ok(Json(modules.into_iter().map(ModuleResponse::from).collect()))
}

pub async fn get_module(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ModuleResponse>> {
    let module = Module::find_by_slug(&state.db, &slug)
        .await?
        .filter(|m| m.is_active)
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", slug)))?;

    Ok(Json(module.into()))
}
