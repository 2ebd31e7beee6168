/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use iahome_api::{app::AppState, config::Config};
/// use iahome_shared::redis::{RedisClient, RedisConfig};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let redis = RedisClient::new(RedisConfig::with_url(&config.redis.url)).await?;
/// let state = AppState::new(pool, redis, config)?;
/// let app = iahome_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{
        auth::{jwt_auth_layer, require_admin},
        edge_gate::edge_gate_layer,
        security::SecurityHeadersLayer,
    },
    proxy,
    routes,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{any, delete, get, post, put},
    Router,
};
use iahome_shared::{
    access::AccessValidator,
    auth::module_token::ModuleTokenIssuer,
    redis::{RedisClient, UploadSessionStore},
    usage::UsageCounter,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor. Every
/// field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Redis connection manager (upload sessions)
    pub redis: RedisClient,

    /// Client used to reach module backends
    pub http: reqwest::Client,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend init).
    pub fn new(db: PgPool, redis: RedisClient, config: Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            db,
            redis,
            http,
            config: Arc::new(config),
        })
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    pub fn token_issuer(&self) -> ModuleTokenIssuer {
        ModuleTokenIssuer::new(
            self.jwt_secret(),
            self.config.jwt.module_token_ttl_secs,
            self.config.jwt.module_token_max_ttl_secs,
        )
    }

    pub fn access_validator(&self) -> AccessValidator {
        AccessValidator::new(self.db.clone(), self.jwt_secret())
    }

    pub fn usage_counter(&self) -> UsageCounter {
        UsageCounter::new(self.db.clone())
    }

    pub fn upload_store(&self) -> UploadSessionStore {
        UploadSessionStore::new(
            self.redis.get_connection(),
            self.config.redis.upload_session_ttl_secs,
            self.config.redis.upload_max_bytes,
        )
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # Database + Redis check (public)
/// ├── /qr/:code                        # QR redirect (public)
/// ├── /v1/
/// │   ├── /auth/                       # register, login, refresh, verify-email,
/// │   │                                # password-reset/{request,confirm}
/// │   ├── /modules/                    # catalog (public)
/// │   ├── /admin/                      # module CRUD, grants (admin session)
/// │   ├── /applications/               # own grants (session)
/// │   ├── /tokens/issue                # module token (session)
/// │   ├── /tokens/validate             # token check (public)
/// │   ├── /usage/record                # usage increment (module token)
/// │   ├── /qr/                         # own QR codes (session)
/// │   └── /uploads/                    # chunked uploads (session)
/// └── /proxy/:module/*path             # module reverse proxy (module token)
/// ```
///
/// # Middleware Stack
///
/// Outermost first:
/// 1. CORS (tower-http CorsLayer)
/// 2. Logging (tower-http TraceLayer)
/// 3. Edge gate for `GATED_HOSTS`
/// 4. Security headers (API routes only; proxied pages keep their own)
/// 5. Session authentication (per-route basis)
pub fn build_router(state: AppState) -> Router {
    // Health check (public, no auth)
    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    // Auth routes (public, no auth required)
    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh))
        .route("/verify-email", post(routes::auth::verify_email))
        .route(
            "/password-reset/request",
            post(routes::auth::request_password_reset),
        )
        .route(
            "/password-reset/confirm",
            post(routes::auth::confirm_password_reset),
        );

    // Catalog (public)
    let module_routes = Router::new()
        .route("/", get(routes::modules::list_modules))
        .route("/:slug", get(routes::modules::get_module));

    // Admin routes (session + admin role)
    let admin_routes = Router::new()
        .route("/modules", post(routes::admin::create_module))
        .route("/modules/:id", put(routes::admin::update_module))
        .route("/applications", post(routes::admin::grant_application))
        .layer(axum::middleware::from_fn(require_admin))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    // Own grants (session)
    let application_routes = Router::new()
        .route("/", get(routes::applications::list_applications))
        .route("/activate", post(routes::applications::activate_application))
        .route(
            "/:id/deactivate",
            post(routes::applications::deactivate_application),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    // Token issuance needs a session; validation carries its own token
    let token_routes = Router::new()
        .route("/issue", post(routes::tokens::issue_token))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ))
        .route("/validate", post(routes::tokens::validate_token));

    let usage_routes = Router::new().route("/record", post(routes::usage::record_usage));

    let qr_routes = Router::new()
        .route(
            "/",
            get(routes::qr::list_qr_codes).post(routes::qr::create_qr_code),
        )
        .route("/:id", delete(routes::qr::delete_qr_code))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let upload_routes = Router::new()
        .route("/", post(routes::uploads::init_upload))
        .route(
            "/:id/chunks/:index",
            put(routes::uploads::put_chunk)
                .layer(DefaultBodyLimit::max(routes::uploads::MAX_CHUNK_BYTES)),
        )
        .route("/:id/complete", post(routes::uploads::complete_upload))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    // Build complete v1 API
    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/modules", module_routes)
        .nest("/admin", admin_routes)
        .nest("/applications", application_routes)
        .nest("/tokens", token_routes)
        .nest("/usage", usage_routes)
        .nest("/qr", qr_routes)
        .nest("/uploads", upload_routes);

    let api_routes = Router::new()
        .merge(health_routes)
        .route("/qr/:code", get(routes::qr::redirect_qr_code))
        .nest("/v1", v1_routes)
        .layer(SecurityHeadersLayer::new(state.config.api.production));

    // `*path` does not match an empty remainder, hence three routes
    let proxy_routes = Router::new()
        .route("/proxy/:module", any(proxy::forward))
        .route("/proxy/:module/", any(proxy::forward))
        .route("/proxy/:module/*path", any(proxy::forward));

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(Duration::from_secs(3600))
    };

    // Combine all routes with middleware stack
    Router::new()
        .merge(api_routes)
        .merge(proxy_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            edge_gate_layer,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}
