//! Subcommand implementations.

pub mod chat;
pub mod replicas;
pub mod users;

use replica_chat_server::config::{ConfigError, ResilienceConfig, UpstreamConfig};
use replica_chat_server::upstream::{UpstreamClient, UpstreamError};
use thiserror::Error;

/// Errors raised while wiring a command to upstream.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build upstream client: {0}")]
    Client(#[from] UpstreamError),
}

/// Upstream client plus the retry and timeout settings, from the environment.
pub fn connect() -> Result<(UpstreamClient, ResilienceConfig), SetupError> {
    let upstream = UpstreamConfig::from_env()?;
    let resilience = ResilienceConfig::from_env()?;
    tracing::debug!(upstream = %upstream.base_url, "Connecting to upstream");
    Ok((UpstreamClient::new(&upstream)?, resilience))
}
