//! User record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Email, UserId};

/// A user known to this gateway.
///
/// `id` is either the locally derived id or the id upstream already had on
/// file for the same email. It never changes once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user record stamped with the current time.
    #[must_use]
    pub fn new(id: UserId, email: Email) -> Self {
        Self {
            id,
            email,
            created_at: Utc::now(),
        }
    }
}
