//! Health and root endpoints.

use axum::{response::IntoResponse, Json};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Always "ok" while the process is up.
    pub status: String,
}

/// Root welcome response.
#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: String,
}

/// Liveness check.
///
/// Returns 200 whenever the process is running; deliberately checks no
/// dependencies, so a down broker or backend does not flip it.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Root welcome route.
pub async fn welcome() -> impl IntoResponse {
    Json(WelcomeResponse {
        message: "Welcome to the relay gateway".to_string(),
    })
}
