//! HTTP API handlers and routing.

mod health;
mod proxy;
mod publish;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main router.
///
/// The publish route is matched before the fallback, so publish requests are
/// handled here and never proxied; everything else under `/api` goes to the
/// upstream backend.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    let body_limit = state.body_limit();

    Router::new()
        .route("/", get(health::welcome))
        .route("/health", get(health::health))
        .route(
            "/api/tenants/{tenant_id}/publish",
            post(publish::publish_message),
        )
        .fallback(proxy::forward)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        // Application state
        .with_state(state)
}
