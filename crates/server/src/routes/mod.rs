//! HTTP route handlers for the gateway.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Health check
//!
//! # Users
//! POST /users/check            - Check-or-create by email (never fails on upstream outage)
//! POST /users                  - Create user upstream (409 answered as success)
//! GET  /users?userId=          - Fetch user from upstream
//! GET  /users/verify?userId=   - Does the user exist upstream?
//! POST /users/verify           - Ensure the user exists upstream
//! POST /users/sync             - Mirror the upstream user for an email locally
//!
//! # Replicas
//! POST /replicas               - Create replica (owner verified first)
//! GET  /replicas?ownerID=      - List replicas
//!
//! # Chat
//! POST /chat                   - Send a message, returns the completion
//! GET  /chat/history?replicaUUID=&userId= - Web chat history, oldest first
//! ```

pub mod chat;
pub mod replicas;
pub mod users;

use axum::{
    Router,
    extract::FromRequest,
    middleware::from_fn,
    routing::{get, post},
};
use serde_json::Value;

use crate::error::AppError;
use crate::middleware::{cors_layer, request_id_middleware, trace_layer};
use crate::state::AppState;

/// JSON request body whose rejections are answered as `{"error": ...}` 400s.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Trimmed, non-empty value of an optional request field.
///
/// # Errors
///
/// Returns `AppError::Validation` with `message` if the field is absent or blank.
pub fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

/// Upstream error body as text for `details` fields.
#[must_use]
pub fn body_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Create the user routes router.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(users::show).post(users::create))
        .route("/check", post(users::check))
        .route("/verify", get(users::verify).post(users::ensure))
        .route("/sync", post(users::sync))
}

/// Create the replica routes router.
pub fn replica_routes() -> Router<AppState> {
    Router::new().route("/", get(replicas::index).post(replicas::create))
}

/// Create the chat routes router.
pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(chat::send))
        .route("/history", get(chat::history))
}

/// Create all routes for the gateway, with middleware and state applied.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(state.config().cors_allow_origin.as_deref());

    Router::new()
        .route("/health", get(health))
        .nest("/users", user_routes())
        .nest("/replicas", replica_routes())
        .nest("/chat", chat_routes())
        .layer(from_fn(request_id_middleware))
        .layer(trace_layer())
        .layer(cors)
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check upstream.
async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_required_trims_and_rejects_blank() {
        assert_eq!(required(Some("  a@b.co "), "Email is required").unwrap(), "a@b.co");
        assert!(required(Some("   "), "Email is required").is_err());

        let err = required(None, "Email is required").unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Email is required");
    }

    #[test]
    fn test_body_text() {
        assert_eq!(body_text(&json!("plain")), "plain");
        assert_eq!(body_text(&json!({"error": "x"})), r#"{"error":"x"}"#);
    }
}
