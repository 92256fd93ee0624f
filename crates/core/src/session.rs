//! Client-held chat session state.
//!
//! [`SessionStore`] is the explicit state container a front-end owns for the
//! lifetime of a signed-in session: the current user, the replicas they can
//! talk to, the active replica and its live message sequence, and a per-replica
//! history so switching between replicas does not lose in-progress
//! conversations. It performs no I/O; fetched history is handed in through
//! [`SessionStore::merge_history`].

use std::collections::HashMap;

use crate::types::{Message, Replica, ReplicaId, User};

/// Session state for one signed-in front-end.
///
/// `SessionStore::default()` is the initial state; [`SessionStore::reset`]
/// returns to it (used on sign-out and forced re-authentication).
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    user: Option<User>,
    replicas: Vec<Replica>,
    active: Option<ReplicaId>,
    messages: Vec<Message>,
    history: HashMap<ReplicaId, Vec<Message>>,
    loading: bool,
}

impl SessionStore {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and return to the initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    #[must_use]
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn set_replicas(&mut self, replicas: Vec<Replica>) {
        self.replicas = replicas;
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    pub const fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// The replica currently being chatted with.
    #[must_use]
    pub const fn active_replica(&self) -> Option<&ReplicaId> {
        self.active.as_ref()
    }

    /// The live message sequence of the active replica.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The stored sequence for a replica, as of the last switch or merge.
    ///
    /// For the active replica this can lag behind [`Self::messages`] until the
    /// next switch.
    #[must_use]
    pub fn history(&self, uuid: &ReplicaId) -> Option<&[Message]> {
        self.history.get(uuid).map(Vec::as_slice)
    }

    /// Make `uuid` the active replica.
    ///
    /// The live sequence of the previously active replica is saved into the
    /// history map first, then the new replica's saved sequence (or an empty
    /// one) becomes live. Reselecting the active replica is a no-op.
    pub fn select_replica(&mut self, uuid: ReplicaId) {
        if self.active.as_ref() == Some(&uuid) {
            return;
        }
        self.snapshot_active();
        self.messages = self.history.get(&uuid).cloned().unwrap_or_default();
        self.active = Some(uuid);
    }

    /// Save the live sequence and leave no replica active.
    pub fn clear_selection(&mut self) {
        self.snapshot_active();
        self.active = None;
    }

    /// Append a message to the live sequence.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Empty the live sequence. The stored history is left untouched.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Replace the stored sequence for `uuid` with freshly fetched history.
    ///
    /// The messages are sorted by ascending timestamp (ties keep their fetched
    /// order). If `uuid` is active the live sequence is replaced as well. The
    /// fetched sequence is authoritative; nothing is deduplicated or merged
    /// with locally added messages.
    pub fn merge_history(&mut self, uuid: ReplicaId, mut messages: Vec<Message>) {
        messages.sort_by_key(|m| m.timestamp);
        if self.active.as_ref() == Some(&uuid) {
            self.messages.clone_from(&messages);
        }
        self.history.insert(uuid, messages);
    }

    fn snapshot_active(&mut self) {
        if let Some(active) = &self.active {
            self.history.insert(active.clone(), self.messages.clone());
        }
    }
}
