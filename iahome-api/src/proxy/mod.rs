/// Module reverse proxy
///
/// `ANY /proxy/:module/*path` validates a module token, then forwards the
/// request to the module's backend and relays the answer.
///
/// # Flow
///
/// 1. The token is read from the `token` query parameter, the
///    `Authorization: Bearer` header, or the per-module cookie, in that order.
/// 2. [`AccessValidator`](iahome_shared::access::AccessValidator) checks the
///    token and re-reads the grant.
/// 3. An entry request (token in the query) must have a use left; it is
///    counted and answered with an HttpOnly cookie scoped to
///    `/proxy/<module>`, so the page's own asset requests authenticate
///    without the query parameter. Those follow-up requests skip the quota
///    and keep working after the entry spent the last use.
/// 4. The request goes to the backend without the token, credentials, or
///    hop-by-hop headers. HTML bodies and `Location` headers are rewritten
///    to stay under the module prefix (see [`rewrite`]).
///
/// Backend timeout → 504, any other upstream failure → 502.

pub mod rewrite;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;
use iahome_shared::models::module::Module;
use std::collections::HashMap;

/// Query parameter carrying the module token on entry
pub const TOKEN_PARAM: &str = "token";

/// Cookie set after a successful entry request
pub const TOKEN_COOKIE: &str = "iahome_module_token";

/// Largest request body forwarded to a backend
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No backend configured for module {0}")]
    NoBackend(String),

    #[error("Unsupported method: {0}")]
    InvalidMethod(String),

    #[error("Failed to read request body: {0}")]
    ReadBody(String),

    #[error("Module backend timed out")]
    Timeout,

    #[error("Module backend unreachable: {0}")]
    Upstream(String),
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Timeout => ApiError::GatewayTimeout(err.to_string()),
            ProxyError::ReadBody(_) | ProxyError::InvalidMethod(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ProxyError::NoBackend(_) | ProxyError::Upstream(_) => {
                ApiError::BadGateway(err.to_string())
            }
        }
    }
}

/// Where a module token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Query,
    Header,
    Cookie,
}

/// How much of the incoming request reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Authenticated proxying: credentials and `Accept-Encoding` dropped
    Proxy,
    /// Edge-gate pass-through: everything but hop-by-hop headers kept
    Relay,
}

/// A backend answer, already converted to gateway types
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Decoded, non-empty query parameter
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get(name).filter(|v| !v.is_empty()).cloned()
}

/// Query string without `name=...` pairs
pub fn strip_query_param(query: &str, name: &str) -> String {
    query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
            !pair.is_empty() && key != name
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Finds the module token in query, `Authorization` header, then cookie
pub fn extract_module_token(uri: &Uri, headers: &HeaderMap) -> Option<(String, TokenSource)> {
    if let Some(token) = query_param(uri, TOKEN_PARAM) {
        return Some((token, TokenSource::Query));
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some((token.to_string(), TokenSource::Header));
    }

    cookie_value(headers, TOKEN_COOKIE).map(|token| (token, TokenSource::Cookie))
}

/// `Set-Cookie` value carrying the module token for follow-up requests
pub fn module_cookie(token: &str, path: &str, expires_at: i64, secure: bool) -> String {
    let max_age = (expires_at - Utc::now().timestamp()).max(0);
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        TOKEN_COOKIE, token, path, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Backend base URL: `<SLUG>_SERVICE_URL` first, then the module row
pub async fn backend_url(state: &AppState, module: &str) -> ApiResult<String> {
    if let Some(url) = state.config.proxy.service_url(module) {
        return Ok(url.to_string());
    }

    Module::find_by_slug(&state.db, module)
        .await?
        .and_then(|m| m.url)
        .map(|url| url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ProxyError::NoBackend(module.to_string()).into())
}

fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Headers sent to the backend for an incoming request
pub fn upstream_headers(incoming: &HeaderMap, mode: ForwardMode) -> reqwest::header::HeaderMap {
    let listed = connection_listed(incoming);
    let mut headers = reqwest::header::HeaderMap::new();

    for (name, value) in incoming {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name)
            || listed.iter().any(|l| l == name)
            || name == "host"
            || name == "content-length"
        {
            continue;
        }
        if mode == ForwardMode::Proxy
            && matches!(name, "authorization" | "cookie" | "accept-encoding")
        {
            continue;
        }

        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    if mode == ForwardMode::Relay {
        if let Some(host) = incoming.get(header::HOST).and_then(|h| h.to_str().ok()) {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(host) {
                headers.insert("x-forwarded-host", value);
            }
        }
    }

    headers
}

fn upstream_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Upstream(err.to_string())
    }
}

/// Sends one request to a backend and buffers the answer
pub async fn send_upstream(
    client: &reqwest::Client,
    method: &Method,
    url: &str,
    headers: reqwest::header::HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse, ProxyError> {
    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| ProxyError::InvalidMethod(method.to_string()))?;

    let response = client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(upstream_error)?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name) || name == "content-length" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let body = response.bytes().await.map_err(upstream_error)?;

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// Builds the client response, rewriting paths when `prefix` is given
pub fn into_client_response(upstream: UpstreamResponse, prefix: Option<&str>) -> Response {
    let UpstreamResponse {
        status,
        mut headers,
        body,
    } = upstream;

    let body = match prefix {
        Some(prefix) => {
            let location = headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| rewrite::rewrite_location(loc, prefix))
                .and_then(|loc| HeaderValue::from_str(&loc).ok());
            if let Some(location) = location {
                headers.insert(header::LOCATION, location);
            }

            if is_html(&headers) {
                let rewritten = std::str::from_utf8(&body)
                    .ok()
                    .map(|html| rewrite::rewrite_html(html, prefix).into_owned());
                rewritten.map(Bytes::from).unwrap_or(body)
            } else {
                body
            }
        }
        None => body,
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// `ANY /proxy/:module`, `/proxy/:module/`, `/proxy/:module/*path`
pub async fn forward(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request,
) -> ApiResult<Response> {
    let module = params
        .get("module")
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Module not found".to_string()))?;
    let path = params
        .get("path")
        .map(|p| p.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let (token, source) = extract_module_token(req.uri(), req.headers())
        .ok_or_else(|| ApiError::Unauthorized("Missing module token".to_string()))?;

    let validator = state.access_validator();
    let access = if source == TokenSource::Query {
        validator.validate(&token, &module).await?
    } else {
        validator.validate_session(&token, &module).await?
    };
    let user_id = access.claims.sub;

    if source == TokenSource::Query {
        let usage = state.usage_counter().record(user_id, &module).await?;
        tracing::info!(
            user_id = %user_id,
            module = %module,
            usage_count = usage.usage_count,
            remaining = ?usage.remaining,
            "Module session opened"
        );
    }

    let backend = backend_url(&state, &module).await?;
    let query = req
        .uri()
        .query()
        .map(|q| strip_query_param(q, TOKEN_PARAM))
        .filter(|q| !q.is_empty());
    let url = match query {
        Some(query) => format!("{}/{}?{}", backend, path, query),
        None => format!("{}/{}", backend, path),
    };
    let prefix = rewrite::module_prefix(&module);

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::ReadBody(e.to_string()))?;

    let mut headers = upstream_headers(&parts.headers, ForwardMode::Proxy);
    if let Ok(value) = reqwest::header::HeaderValue::from_str(&prefix) {
        headers.insert("x-forwarded-prefix", value);
    }

    let upstream = send_upstream(&state.http, &parts.method, &url, headers, body)
        .await
        .map_err(|e| {
            tracing::warn!(module = %module, url = %url, error = %e, "Upstream request failed");
            e
        })?;

    tracing::debug!(
        module = %module,
        method = %parts.method,
        status = upstream.status.as_u16(),
        "Proxied request"
    );

    let mut response = into_client_response(upstream, Some(&prefix));

    if source == TokenSource::Query {
        let cookie = module_cookie(
            &token,
            &prefix,
            access.claims.exp,
            state.config.api.production,
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}

/// Forwards a request on a gated host to its module backend unchanged
pub async fn relay(state: &AppState, module: &str, req: Request) -> ApiResult<Response> {
    let backend = backend_url(state, module).await?;
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", backend, path_and_query);

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::ReadBody(e.to_string()))?;
    let headers = upstream_headers(&parts.headers, ForwardMode::Relay);

    let upstream = send_upstream(&state.http, &parts.method, &url, headers, body)
        .await
        .map_err(|e| {
            tracing::warn!(module = %module, url = %url, error = %e, "Gated relay failed");
            e
        })?;

    Ok(into_client_response(upstream, None))
}
