//! Chat route handlers.

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use replica_chat_core::{Message, ReplicaId, UserId};

use super::{JsonBody, body_text, required};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upstream::UpstreamError;

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "replicaUUID", default)]
    pub replica_uuid: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// `?replicaUUID=&userId=` query.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "replicaUUID", default)]
    pub replica_uuid: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// Answer of `GET /chat/history`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub total: usize,
}

/// Send one message and return upstream's completion.
///
/// Not retried: a repeated completion would duplicate the message.
#[instrument(skip(state, body))]
pub async fn send(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ChatRequest>,
) -> Result<Json<Value>> {
    let missing = || AppError::Validation("Missing required fields".to_string());
    let replica = body.replica_uuid.as_deref().filter(|v| !v.trim().is_empty()).ok_or_else(missing)?;
    let content = body.content.as_deref().filter(|v| !v.trim().is_empty()).ok_or_else(missing)?;
    let user = body
        .user_id
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(UserId::new);

    let response = state
        .upstream()
        .chat_completion(
            &ReplicaId::new(replica.trim()),
            user.as_ref(),
            content,
            state.config().resilience.request_timeout,
        )
        .await?;
    Ok(Json(response.error_for_status()?.body))
}

/// Fetch the web chat history for a replica and user, oldest first.
#[instrument(skip(state))]
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response> {
    let message = "Missing replicaUUID or userId";
    let replica = ReplicaId::new(required(query.replica_uuid.as_deref(), message)?);
    let user = UserId::new(required(query.user_id.as_deref(), message)?);

    match state
        .upstream()
        .chat_history(&replica, Some(&user), state.config().resilience.request_timeout)
        .await
    {
        Ok(messages) => Ok(Json(HistoryResponse {
            success: true,
            total: messages.len(),
            messages,
        })
        .into_response()),
        Err(UpstreamError::Status { status, body }) => {
            tracing::error!(status = %status, user_id = %user, replica = %replica, "Chat history request failed");
            Ok((
                status,
                Json(json!({
                    "error": "Failed to fetch chat history",
                    "details": format!("API returned {}: {}", status.as_u16(), body_text(&body)),
                    "userId": user,
                    "replicaUUID": replica,
                })),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}
