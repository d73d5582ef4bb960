//! Tenant publish endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_broker::QueueName;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Success acknowledgment.
///
/// Means "enqueued for transport", not "durably stored by the broker".
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PublishAccepted {
    pub message: String,
}

/// Failure response body.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PublishFailed {
    pub error: String,
}

/// Handle `POST /api/tenants/{tenant_id}/publish`.
///
/// If the channel is down, triggers a reconnect and waits one bounded grace
/// period for it to come up before re-checking. There is no retry loop: a
/// channel still down after the grace period fails the request immediately,
/// and retrying a failed publish is the caller's responsibility.
pub async fn publish_message(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let queue = QueueName::for_tenant(&tenant_id);

    if !state.broker().is_connected() {
        warn!(queue = %queue, "Broker channel down at publish time, reconnecting");
        state.broker().ensure_connected().await;
        state.broker().wait_connected(state.publish_grace()).await;
    }

    let bytes = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(queue = %queue, error = %e, "Failed to serialize publish payload");
            return publish_failed();
        }
    };

    match state.broker().publish(queue.clone(), bytes).await {
        Ok(()) => {
            info!(queue = %queue, "Message published");
            (
                StatusCode::OK,
                Json(PublishAccepted {
                    message: "Message published successfully".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(queue = %queue, error = %e, "Failed to publish message");
            publish_failed()
        }
    }
}

fn publish_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(PublishFailed {
            error: "Failed to publish message".to_string(),
        }),
    )
        .into_response()
}
