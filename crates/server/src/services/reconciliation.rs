//! Identity reconciliation between the local user cache and upstream.
//!
//! Users sign in with an email. The id we hand out is derived from that email
//! so it is stable across sessions, but upstream may already know the email
//! under a different id (created elsewhere, or created by us with an older
//! scheme). Everything here exists to keep the id we use equal to the id
//! upstream recognizes, while never blocking sign-in on upstream availability.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use replica_chat_core::{Email, NewReplica, User, UserId};

use crate::config::ResilienceConfig;
use crate::store::{CacheError, UserCache};
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamResponse, UpstreamUser};

/// Result of [`Reconciler::check_or_create_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// The user was already known, locally or upstream.
    pub existed: bool,
    /// Answered from the local cache without contacting upstream.
    pub cached: bool,
    pub user: User,
}

/// Result of [`Reconciler::ensure_user`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsureOutcome {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    /// The user as upstream returned it.
    pub user: Value,
}

/// A cache entry whose id was replaced by the id upstream holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealedUser {
    pub previous: UserId,
    pub user: User,
}

/// Result of [`Reconciler::reconcile_cache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub healed: Vec<HealedUser>,
    /// Entries whose id already matched upstream.
    pub confirmed: usize,
    /// Entries with no upstream user of the same email.
    pub unconfirmed: Vec<User>,
}

/// Errors from replica creation.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The owner id is unknown upstream; the client must re-authenticate.
    #[error("owner \"{0}\" does not exist upstream")]
    OwnerNotFound(UserId),

    /// Every creation attempt failed and the last one timed out.
    #[error("replica creation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Errors from the healing pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("failed to update user cache: {0}")]
    Cache(#[from] CacheError),
}

/// Reconciles local identities with upstream.
#[derive(Clone)]
pub struct Reconciler {
    upstream: UpstreamClient,
    users: UserCache,
    resilience: ResilienceConfig,
}

impl Reconciler {
    #[must_use]
    pub const fn new(upstream: UpstreamClient, users: UserCache, resilience: ResilienceConfig) -> Self {
        Self {
            upstream,
            users,
            resilience,
        }
    }

    #[must_use]
    pub const fn users(&self) -> &UserCache {
        &self.users
    }

    /// Resolve the user for `email`, creating it upstream if needed.
    ///
    /// Never fails. A cache hit returns immediately. Otherwise the derived id
    /// is registered upstream under the user retry policy; a conflict adopts
    /// whatever id upstream already holds for the email, and an unreachable
    /// upstream falls back to the derived id. Every path writes the result to
    /// the cache before returning.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn check_or_create_user(&self, email: &Email) -> CheckOutcome {
        if let Some(user) = self.users.get(email).await {
            debug!(user_id = %user.id, "User found in local cache");
            return CheckOutcome {
                existed: true,
                cached: true,
                user,
            };
        }

        let derived = UserId::derive(email);
        let policy = self.resilience.user_create;
        let derived_ref = &derived;

        let outcome = policy
            .run("create_user", |timeout| async move {
                let response = self.upstream.create_user(derived_ref, email, timeout).await?;
                if response.status == StatusCode::CONFLICT {
                    Ok(response)
                } else {
                    response.error_for_status()
                }
            })
            .await;

        match outcome {
            Ok(response) if response.status == StatusCode::CONFLICT => {
                info!(user_id = %derived, "User already exists upstream, resolving id");
                let user = self
                    .resolve_conflict(email, derived, policy.per_attempt_timeout())
                    .await;
                self.persist(&user).await;
                CheckOutcome {
                    existed: true,
                    cached: false,
                    user,
                }
            }
            Ok(_) => {
                info!(user_id = %derived, "User created upstream");
                let user = User::new(derived, email.clone());
                self.persist(&user).await;
                CheckOutcome {
                    existed: false,
                    cached: false,
                    user,
                }
            }
            Err(e) => {
                warn!(user_id = %derived, error = %e, "Upstream unavailable, using derived identity");
                let user = User::new(derived, email.clone());
                self.persist(&user).await;
                CheckOutcome {
                    existed: false,
                    cached: false,
                    user,
                }
            }
        }
    }

    /// Create a replica after verifying its owner exists upstream.
    ///
    /// Creation is retried on transport failures and timeouts only; any
    /// upstream answer, success or not, is returned as-is.
    ///
    /// # Errors
    ///
    /// - [`ReplicaError::OwnerNotFound`] if upstream answers 404 for the owner;
    ///   no creation is attempted.
    /// - [`ReplicaError::Upstream`] if the owner check fails otherwise, or the
    ///   last creation attempt failed without timing out.
    /// - [`ReplicaError::Timeout`] if the last creation attempt timed out.
    #[instrument(skip(self, replica), fields(owner_id = %replica.owner_id, name = %replica.name))]
    pub async fn create_replica(&self, replica: &NewReplica) -> Result<UpstreamResponse, ReplicaError> {
        let owner = self
            .upstream
            .get_user(&replica.owner_id, self.resilience.request_timeout)
            .await?;
        if owner.status == StatusCode::NOT_FOUND {
            warn!("Replica owner does not exist upstream");
            return Err(ReplicaError::OwnerNotFound(replica.owner_id.clone()));
        }
        owner.error_for_status()?;

        let response = self
            .resilience
            .replica_create
            .run("create_replica", |timeout| {
                self.upstream.create_replica(replica, timeout)
            })
            .await
            .map_err(|e| match e {
                UpstreamError::Timeout(after) => ReplicaError::Timeout(after),
                other => ReplicaError::Upstream(other),
            })?;

        if response.is_success() {
            info!(status = %response.status, "Replica created");
        } else {
            warn!(status = %response.status, body = %response.body, "Upstream rejected replica");
        }
        Ok(response)
    }

    /// Make sure `user_id` exists upstream, creating it with `email` if not.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Status`] when creation is answered with
    /// anything but 2xx or 409, and transport errors from either call.
    #[instrument(skip(self), fields(user_id = %user_id, email = %email))]
    pub async fn ensure_user(&self, user_id: &UserId, email: &Email) -> Result<EnsureOutcome, UpstreamError> {
        let timeout = self.resilience.request_timeout;

        let existing = self.upstream.get_user(user_id, timeout).await?;
        if existing.is_success() {
            return Ok(EnsureOutcome {
                exists: true,
                created: None,
                user: existing.body,
            });
        }

        debug!(status = %existing.status, "User not found upstream, creating");
        let response = self.upstream.create_user(user_id, email, timeout).await?;
        let conflict = response.status == StatusCode::CONFLICT;
        let response = if conflict {
            response
        } else {
            response.error_for_status()?
        };

        Ok(EnsureOutcome {
            exists: conflict,
            created: Some(!conflict),
            user: response.body,
        })
    }

    /// Look `email` up in upstream's user list and mirror a match locally.
    ///
    /// # Errors
    ///
    /// Returns error if the user list cannot be fetched or read.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn sync_user(&self, email: &Email) -> Result<Option<UpstreamUser>, UpstreamError> {
        let users = self.upstream.list_users(self.resilience.request_timeout).await?;
        debug!(total = users.len(), "Fetched upstream users");

        let Some(found) = find_by_email(&users, email) else {
            info!("User not found upstream");
            return Ok(None);
        };

        self.persist(&found.to_user(email)).await;
        Ok(Some(found.clone()))
    }

    /// Replace cached ids that disagree with upstream.
    ///
    /// Entries created while upstream was unreachable keep the derived id; if
    /// upstream later turns out to hold the same email under another id, the
    /// cache entry is rewritten to that id.
    ///
    /// # Errors
    ///
    /// Returns error if the user list cannot be fetched or a healed entry
    /// cannot be written.
    #[instrument(skip(self))]
    pub async fn reconcile_cache(&self) -> Result<ReconcileReport, ReconcileError> {
        let upstream = self.upstream.list_users(self.resilience.request_timeout).await?;
        let mut report = ReconcileReport::default();

        for cached in self.users.all().await {
            match find_by_email(&upstream, &cached.email) {
                Some(found) if found.id == cached.id => report.confirmed += 1,
                Some(found) => {
                    let user = found.to_user(&cached.email);
                    info!(from = %cached.id, to = %user.id, "Healing cached identity");
                    self.users.put(user.clone()).await?;
                    report.healed.push(HealedUser {
                        previous: cached.id,
                        user,
                    });
                }
                None => report.unconfirmed.push(cached),
            }
        }

        info!(
            healed = report.healed.len(),
            confirmed = report.confirmed,
            unconfirmed = report.unconfirmed.len(),
            "User cache reconciled"
        );
        Ok(report)
    }

    async fn resolve_conflict(&self, email: &Email, derived: UserId, timeout: Duration) -> User {
        match self.upstream.list_users(timeout).await {
            Ok(users) => match find_by_email(&users, email) {
                Some(found) => {
                    if found.id != derived {
                        info!(derived = %derived, upstream = %found.id, "Adopting upstream user id");
                    }
                    found.to_user(email)
                }
                None => {
                    warn!(
                        user_id = %derived,
                        "Upstream reported a conflict but lists no user with this email, keeping derived id"
                    );
                    User::new(derived, email.clone())
                }
            },
            Err(e) => {
                warn!(user_id = %derived, error = %e, "Failed to list upstream users, keeping derived id");
                User::new(derived, email.clone())
            }
        }
    }

    async fn persist(&self, user: &User) {
        if let Err(e) = self.users.put(user.clone()).await {
            warn!(user_id = %user.id, error = %e, "Failed to write user cache");
        }
    }
}

/// Exact email match first, then a case-insensitive one.
fn find_by_email<'a>(users: &'a [UpstreamUser], email: &Email) -> Option<&'a UpstreamUser> {
    users.iter().find(|u| u.email_is(email)).or_else(|| {
        let found = users.iter().find(|u| u.email_matches(email));
        if let Some(user) = found {
            warn!(user_id = %user.id, "Matched upstream user by email ignoring case");
        }
        found
    })
}
