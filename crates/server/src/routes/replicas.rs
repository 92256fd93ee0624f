//! Replica route handlers.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use replica_chat_core::{NewReplica, UserId};

use super::{JsonBody, required};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// `?ownerID=` query.
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    #[serde(rename = "ownerID", default)]
    pub owner_id: Option<String>,
}

/// Create a replica for a verified owner.
///
/// The payload is forwarded to upstream with any extra fields intact.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> Result<Json<Value>> {
    required(body.get("ownerID").and_then(Value::as_str), "ownerID is required")?;
    let replica: NewReplica = serde_json::from_value(body)
        .map_err(|e| AppError::Validation(format!("Invalid replica: {e}")))?;

    let response = state.reconciler().create_replica(&replica).await?;
    Ok(Json(response.error_for_status()?.body))
}

/// List replicas, optionally for one owner.
#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>> {
    let owner = query
        .owner_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new);

    let response = state
        .upstream()
        .list_replicas(owner.as_ref(), None, state.config().resilience.request_timeout)
        .await?;
    Ok(Json(response.error_for_status()?.body))
}
