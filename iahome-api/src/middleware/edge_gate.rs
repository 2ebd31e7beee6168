/// Edge gate for module hosts
///
/// Some modules are also reachable on their own host name (configured via
/// `GATED_HOSTS`, e.g. `whisper.iahome.fr=whisper`). On such a host a
/// top-level page navigation must arrive with a `token` query parameter;
/// otherwise the browser is sent to the access-denied page. Everything else
/// (assets, XHR, the navigation with its token) is relayed to the module
/// backend untouched.
///
/// The gate only checks presence. Validation happens in the backend-facing
/// proxy or in the module itself through `/v1/tokens/validate`.

use crate::{app::AppState, proxy};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

/// Whether the request is a browser loading a page rather than a subresource
pub fn is_document_navigation(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }

    if let Some(dest) = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()) {
        return dest.eq_ignore_ascii_case("document");
    }

    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

pub async fn edge_gate_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let module = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|host| state.config.proxy.gated_module(host))
        .map(str::to_string);

    let Some(module) = module else {
        return next.run(req).await;
    };

    if is_document_navigation(req.method(), req.headers())
        && proxy::query_param(req.uri(), proxy::TOKEN_PARAM).is_none()
    {
        tracing::info!(
            module = %module,
            path = %req.uri().path(),
            "Gated navigation without token, redirecting"
        );
        return Redirect::temporary(&state.config.proxy.access_denied_url).into_response();
    }

    match proxy::relay(&state, &module, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
