//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::Reconciler;
use crate::store::UserCache;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// upstream client, the user cache and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    upstream: UpstreamClient,
    reconciler: Reconciler,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built.
    pub fn new(config: ServerConfig) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let users = UserCache::new(config.user_cache_path.clone());
        let reconciler = Reconciler::new(upstream.clone(), users, config.resilience.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                upstream,
                reconciler,
            }),
        })
    }

    /// Get a reference to the gateway configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the upstream client.
    #[must_use]
    pub fn upstream(&self) -> &UpstreamClient {
        &self.inner.upstream
    }

    /// Get a reference to the reconciliation service.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }
}
