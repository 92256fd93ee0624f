//! Client for the hosted replica platform.
//!
//! # Architecture
//!
//! - [`UpstreamClient`] performs single calls. Every call carries its own
//!   timeout; when it fires the in-flight request is dropped and the call fails
//!   with [`UpstreamError::Timeout`]. Non-2xx responses are returned intact.
//! - [`RetryPolicy`] is the only place retries happen. Callers decide which
//!   operations are safe to repeat and which outcomes count as retryable.
//! - [`types`] maps the handful of list shapes upstream is known to return
//!   onto one canonical `Vec`.
//!
//! # Headers
//!
//! Every request sends `X-ORGANIZATION-SECRET`, `X-API-Version` and
//! `Content-Type: application/json`; user-scoped calls add `X-USER-ID`.

mod client;
mod retry;
pub mod types;

pub use client::{REPLICA_PAGE_SIZE, UpstreamClient, UpstreamResponse};
pub use retry::RetryPolicy;
pub use types::{ListEnvelope, UpstreamUser};

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Header carrying the organization secret.
pub const ORG_SECRET_HEADER: &str = "X-ORGANIZATION-SECRET";
/// Header carrying the API version.
pub const API_VERSION_HEADER: &str = "X-API-Version";
/// Header scoping a call to one user.
pub const USER_ID_HEADER: &str = "X-USER-ID";

/// Errors that can occur when talking to the upstream platform.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport-level failure (connection refused, TLS, reset, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The call did not complete within its timeout and was aborted.
    #[error("upstream did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Upstream answered with a status the caller treats as a failure.
    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: Value },

    /// The response body was not JSON.
    #[error("unparseable upstream response ({status}): {raw}")]
    Malformed { status: StatusCode, raw: String },

    /// The response was JSON but not in any shape we recognize.
    #[error("unexpected upstream response shape: {0}")]
    UnexpectedShape(String),

    /// The client could not be built from configuration.
    #[error("invalid upstream configuration: {0}")]
    Config(String),
}

impl UpstreamError {
    /// Whether this error is an aborted (timed out) call.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The upstream status, when upstream answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } | Self::Malformed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
