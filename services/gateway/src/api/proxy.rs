//! Reverse proxy forwarder for the upstream backend.
//!
//! Everything under `/api` that is not a publish request is forwarded to the
//! upstream backend with the same method, path, query, and headers. JSON
//! bodies are re-serialized before forwarding and `Content-Length` is set to
//! the exact re-serialized byte length; other bodies pass through untouched.
//! Upstream responses are relayed verbatim. Failed calls are not retried.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::state::AppState;

/// Uniform error payload for upstream failures.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProxyErrorBody {
    pub error: String,
    pub message: String,
    pub details: String,
}

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Fallback handler: forward the request to the upstream backend.
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    if !request.uri().path().starts_with("/api") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let url = format!("{}{}", state.upstream_url(), path_and_query);

    let body_bytes = match axum::body::to_bytes(body, state.body_limit()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url = %url, error = %e, "Rejecting proxied request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let outgoing = reserialize_json_body(&parts.headers, body_bytes);

    debug!(
        method = %parts.method,
        url = %url,
        body_bytes = outgoing.len(),
        "Proxying request to upstream"
    );

    let mut builder = state
        .http()
        .request(parts.method.clone(), &url)
        .headers(request_headers(&parts.headers));
    if !outgoing.is_empty() {
        // The inbound Content-Length was dropped above; the forwarded one
        // must reflect the bytes actually sent.
        builder = builder
            .header(header::CONTENT_LENGTH, HeaderValue::from(outgoing.len()))
            .body(outgoing);
    }
    let result = builder.send().await;

    let upstream = match result {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(url = %url, error = %e, "Proxy request failed");
            return proxy_error(&e);
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let response_body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(url = %url, error = %e, "Failed to read upstream response");
            return proxy_error(&e);
        }
    };

    let mut response = Response::new(Body::from(response_body));
    *response.status_mut() = status;
    for (name, value) in headers.iter() {
        if !is_connection_scoped(name) && name != &header::CONTENT_LENGTH {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

/// Re-serialize a JSON body so the forwarded `Content-Length` reflects the
/// bytes actually sent. Non-JSON and unparseable bodies pass through as-is.
fn reserialize_json_body(headers: &HeaderMap, body: Bytes) -> Bytes {
    if body.is_empty() || !is_json(headers) {
        return body;
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => match serde_json::to_vec(&value) {
            Ok(reserialized) => Bytes::from(reserialized),
            Err(_) => body,
        },
        Err(_) => body,
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

/// Headers for the outgoing upstream request: everything except `Host`
/// (rewritten by the client), the stale `Content-Length`, and
/// connection-scoped headers.
fn request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if name == &header::HOST || name == &header::CONTENT_LENGTH || is_connection_scoped(name) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn is_connection_scoped(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|hop| hop == name)
}

fn proxy_error(error: &reqwest::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ProxyErrorBody {
            error: "Proxy Error".to_string(),
            message: "Unable to reach backend service".to_string(),
            details: error.to_string(),
        }),
    )
        .into_response()
}
