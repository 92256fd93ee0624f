//! User route handlers.
//!
//! `check` is what the front-end calls on sign-in; the rest are thin
//! wrappers over upstream's user directory.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use replica_chat_core::{Email, User, UserId};

use super::{JsonBody, body_text, required};
use crate::error::{AppError, Result};
use crate::services::EnsureOutcome;
use crate::state::AppState;
use crate::upstream::{UpstreamError, UpstreamUser};

/// Body of `POST /users/check` and `POST /users/sync`.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `POST /users/verify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// `?userId=` query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Answer of `POST /users/check`.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub exists: bool,
    pub user: User,
    /// Present (and `true`) when the answer came from the local cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// The user `POST /users/sync` found upstream.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedUser {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub linked_accounts: Vec<Value>,
}

fn parse_email(raw: Option<&str>) -> Result<Email> {
    let raw = required(raw, "Email is required")?;
    Email::parse(raw).map_err(|e| AppError::Validation(format!("Invalid email: {e}")))
}

/// Check-or-create the user for an email.
#[instrument(skip(state, body))]
pub async fn check(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EmailRequest>,
) -> Result<Json<CheckResponse>> {
    let email = parse_email(body.email.as_deref())?;
    let outcome = state.reconciler().check_or_create_user(&email).await;

    Ok(Json(CheckResponse {
        exists: outcome.existed,
        user: outcome.user,
        verified: outcome.cached.then_some(true),
    }))
}

/// Create a user upstream with the request body as-is.
///
/// A 409 means the user is already there and is answered with the request
/// body plus `exists: true`.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Response> {
    let response = state
        .upstream()
        .create_user_raw(&body, state.config().resilience.request_timeout)
        .await?;

    if response.status == StatusCode::CONFLICT {
        info!("User already exists upstream");
        let mut merged = body;
        if let Value::Object(fields) = &mut merged {
            fields.insert("exists".to_string(), Value::Bool(true));
        }
        return Ok(Json(merged).into_response());
    }

    Ok(Json(response.error_for_status()?.body).into_response())
}

/// Fetch a user from upstream.
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Value>> {
    let user_id = UserId::new(required(query.user_id.as_deref(), "User ID is required")?);
    let response = state
        .upstream()
        .get_user(&user_id, state.config().resilience.request_timeout)
        .await?;

    Ok(Json(response.error_for_status()?.body))
}

/// Report whether a user id exists upstream.
#[instrument(skip(state))]
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Result<Response> {
    let user_id = UserId::new(required(query.user_id.as_deref(), "User ID is required")?);
    let response = state
        .upstream()
        .get_user(&user_id, state.config().resilience.request_timeout)
        .await?;

    if response.status == StatusCode::NOT_FOUND {
        info!(user_id = %user_id, "User not found upstream");
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "exists": false, "error": "User not found" })),
        )
            .into_response());
    }

    let user = response.error_for_status()?.body;
    Ok(Json(json!({ "exists": true, "user": user })).into_response())
}

/// Make sure a user id exists upstream, creating it if needed.
#[instrument(skip(state, body))]
pub async fn ensure(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EnsureRequest>,
) -> Result<Json<EnsureOutcome>> {
    let (Some(user_id), Some(email)) = (
        body.user_id.as_deref().map(str::trim).filter(|v| !v.is_empty()),
        body.email.as_deref().map(str::trim).filter(|v| !v.is_empty()),
    ) else {
        return Err(AppError::Validation("User ID and email are required".to_string()));
    };
    let email = parse_email(Some(email))?;

    let outcome = state
        .reconciler()
        .ensure_user(&UserId::new(user_id), &email)
        .await?;
    Ok(Json(outcome))
}

/// Find the upstream user for an email and mirror it into the local cache.
#[instrument(skip(state, body))]
pub async fn sync(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<EmailRequest>,
) -> Result<Response> {
    let email = parse_email(body.email.as_deref())?;

    match state.reconciler().sync_user(&email).await {
        Ok(Some(UpstreamUser {
            id,
            email: upstream_email,
            created_at,
            linked_accounts,
        })) => {
            let user = SyncedUser {
                id,
                email: upstream_email.unwrap_or_else(|| email.to_string()),
                created_at: created_at.unwrap_or_else(Utc::now),
                linked_accounts: linked_accounts.unwrap_or_default(),
            };
            Ok(Json(json!({ "found": true, "user": user })).into_response())
        }
        Ok(None) => Ok(Json(json!({
            "found": false,
            "message": "User not found upstream",
        }))
        .into_response()),
        Err(UpstreamError::Status { status, body }) => {
            tracing::error!(status = %status, "Failed to fetch users from upstream");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to fetch users from upstream",
                    "details": format!("API returned {}: {}", status.as_u16(), body_text(&body)),
                })),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}
