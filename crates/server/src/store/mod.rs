//! Local persistence.
//!
//! # File: `USER_CACHE_PATH` (default `data/users.json`)
//!
//! A single JSON object mapping user id to [`User`](replica_chat_core::User).
//! It is a cache of upstream's user directory plus the ids handed out while
//! upstream was unreachable; deleting it loses nothing that a later
//! check-or-create cannot rebuild.
//!
//! Writes are serialized twice: a tokio mutex orders writers inside this
//! process and an exclusive `fs2` lock on `<file>.lock` orders writers across
//! processes (the server and `rc-cli users ...`). Every write replaces the file
//! through a rename, so readers never see a torn file.

mod users;

pub use users::UserCache;

use thiserror::Error;

/// Errors that can occur while writing the user cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cache could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The blocking write task panicked or was cancelled.
    #[error("cache write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
