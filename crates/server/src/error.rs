//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side errors to
//! Sentry before responding. All route handlers return `Result<T, AppError>`;
//! error bodies are JSON objects with an `error` message.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::services::ReplicaError;
use crate::upstream::UpstreamError;

const TIMEOUT_MESSAGE: &str = "Request timeout - upstream API is slow";

/// Application-level error type for the gateway.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request is missing a field or carries an invalid one.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream call failed or answered with an error status.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Replica creation failed.
    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),
}

impl AppError {
    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            Self::Upstream(err) | Self::Replica(ReplicaError::Upstream(err)) => upstream_reply(err),
            Self::Replica(ReplicaError::OwnerNotFound(owner)) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": format!(
                        "Owner \"{owner}\" does not exist. Please sign out and sign in again to refresh your account."
                    ),
                    "needsReauth": true,
                }),
            ),
            Self::Replica(ReplicaError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, json!({ "error": TIMEOUT_MESSAGE }))
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Upstream error statuses pass through with upstream's body; everything else
/// becomes a gateway error without internal details.
fn upstream_reply(err: &UpstreamError) -> (StatusCode, Value) {
    match err {
        UpstreamError::Status { status, body } => (*status, body.clone()),
        UpstreamError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, json!({ "error": TIMEOUT_MESSAGE })),
        _ => (StatusCode::BAD_GATEWAY, json!({ "error": "External service error" })),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                status = %status,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
