/// Health check endpoint
///
/// Verifies the server is running and its two backing stores answer.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "redis": "connected"
/// }
/// ```
///
/// Status is `degraded` (still 200) when either store is unreachable.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use iahome_shared::db::pool::health_check as database_health;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Application version
    pub version: String,

    /// Database status
    pub database: String,

    /// Redis status
    pub redis: String,
}

fn label(ok: bool) -> &'static str {
    if ok {
        "connected"
    } else {
        "disconnected"
    }
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let database_ok = database_health(&state.db).await.is_ok();
    let redis_ok = matches!(state.redis.ping().await, Ok(true));

    if !database_ok || !redis_ok {
        tracing::warn!(database_ok, redis_ok, "Health check degraded");
    }

    Ok(Json(HealthResponse {
        status: if database_ok && redis_ok {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: label(database_ok).to_string(),
        redis: label(redis_ok).to_string(),
    }))
}
