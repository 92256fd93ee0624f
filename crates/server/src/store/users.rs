//! File-backed user cache keyed by user id.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use replica_chat_core::{Email, User, UserId};

use super::CacheError;

type UserMap = BTreeMap<UserId, User>;

/// Persistent map of user id to [`User`].
///
/// Reads never fail: a missing file is an empty cache, and an unreadable or
/// corrupt file is logged and treated as empty. Writes return errors so the
/// caller can decide whether they matter.
#[derive(Clone)]
pub struct UserCache {
    inner: Arc<UserCacheInner>,
}

struct UserCacheInner {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl UserCache {
    /// Create a cache backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(UserCacheInner {
                path: path.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Find the cached user with this email, ignoring ASCII case.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn get(&self, email: &Email) -> Option<User> {
        self.load()
            .await
            .into_values()
            .find(|user| email.matches(user.email.as_str()))
    }

    /// All cached users, ordered by id.
    pub async fn all(&self) -> Vec<User> {
        self.load().await.into_values().collect()
    }

    /// Insert or replace `user`.
    ///
    /// Keyed by id; any other entry with the same email (ignoring case) is
    /// dropped so an email never maps to two ids.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be locked, written or renamed.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn put(&self, user: User) -> Result<(), CacheError> {
        self.update(move |users| {
            users.retain(|id, existing| {
                *id == user.id || !user.email.matches(existing.email.as_str())
            });
            users.insert(user.id.clone(), user);
        })
        .await
    }

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be locked or written.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.update(BTreeMap::clear).await
    }

    async fn load(&self) -> UserMap {
        match tokio::fs::read_to_string(&self.inner.path).await {
            Ok(raw) => parse_or_empty(&self.inner.path, &raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => UserMap::new(),
            Err(e) => {
                warn!(path = %self.inner.path.display(), error = %e, "Failed to read user cache, treating as empty");
                UserMap::new()
            }
        }
    }

    async fn update<F>(&self, mutate: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut UserMap) + Send + 'static,
    {
        let _guard = self.inner.write_lock.lock().await;
        let path = self.inner.path.clone();
        tokio::task::spawn_blocking(move || locked_update(&path, mutate)).await?
    }
}

/// Read-modify-write under an exclusive lock on the sidecar lock file.
fn locked_update<F>(path: &Path, mutate: F) -> Result<(), CacheError>
where
    F: FnOnce(&mut UserMap),
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, ".lock"))?;
    lock.lock_exclusive()?;

    let mut users = match fs::read_to_string(path) {
        Ok(raw) => parse_or_empty(path, &raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => UserMap::new(),
        Err(e) => return Err(e.into()),
    };
    mutate(&mut users);

    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(&users)?)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), users = users.len(), "User cache written");

    Ok(())
}

fn parse_or_empty(path: &Path, raw: &str) -> UserMap {
    if raw.trim().is_empty() {
        return UserMap::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "User cache is corrupt, treating as empty");
        UserMap::new()
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
