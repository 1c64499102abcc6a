//! Relay endpoint handlers.
//!
//! Each handler does one broker call and renders plain text. Broker failures
//! become `503 Service Unavailable` so the server keeps running through
//! broker hiccups.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use crate::queue::{types, BrokerError, HelloMessage, MessageQueue};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn MessageQueue>,
}

impl AppState {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Message broker unavailable: {self}\n"),
        )
            .into_response()
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint; reports whether the broker can still publish and
/// consume.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.queue.is_connected() {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
            }),
        )
    }
}

// =============================================================================
// Send
// =============================================================================

/// Publish a greeting stamped with the current time and the caller's
/// address, echoing it back as the response body.
pub async fn send(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<String, BrokerError> {
    let body = HelloMessage::new(remote).to_string();

    if let Err(e) = state.queue.publish(&body).await {
        error!(error = %e, sender = %remote, "message_publish_failed");
        return Err(e);
    }

    info!(sender = %remote, "message_queued");

    Ok(body)
}

// =============================================================================
// Consume
// =============================================================================

/// Return the next buffered message, or a notice when none is waiting.
///
/// This is one opportunistic poll. A message that reaches the consumer a
/// moment after the request is reported absent.
pub async fn consume(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<String, BrokerError> {
    let consumed_at = types::now();

    let message = match state.queue.try_receive().await {
        Ok(message) => message,
        Err(e) => {
            error!(error = %e, requested_by = %remote, "message_consume_failed");
            return Err(e);
        }
    };

    match message {
        Some(body) => {
            info!(
                sent_at = types::sent_at(&body).unwrap_or("unknown"),
                requested_by = %remote,
                "message_consumed"
            );
            Ok(types::consumed(&body, &consumed_at, remote))
        }
        None => {
            info!(requested_by = %remote, "no_messages_queued");
            Ok(types::no_messages(remote))
        }
    }
}
