//! Upstream response shapes.
//!
//! List endpoints are not consistent about their envelope: the same data has
//! been seen as `{"items": [...]}`, `{"users": [...]}` and a bare array. All
//! three normalize to a `Vec`; anything else is an error. Elements are read one
//! by one, and an element that does not fit is skipped with a warning.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use replica_chat_core::{Email, Message, MessageId, MessageRole, User, UserId};

use super::UpstreamError;

/// The envelopes upstream wraps lists in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Items { items: Vec<T> },
    Users { users: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Items { items } => items,
            Self::Users { users } => users,
            Self::Bare(list) => list,
        }
    }
}

/// Normalize any known list envelope into a `Vec`.
///
/// # Errors
///
/// Returns [`UpstreamError::UnexpectedShape`] if `body` is not one of the
/// known envelopes. Elements that do not match `T` are dropped, not errors.
pub fn normalize_list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, UpstreamError> {
    let kind = match &body {
        Value::Object(map) => format!("object with keys {:?}", map.keys().collect::<Vec<_>>()),
        Value::Array(_) => "array".to_string(),
        other => other.to_string(),
    };
    let elements = serde_json::from_value::<ListEnvelope<Value>>(body)
        .map(ListEnvelope::into_vec)
        .map_err(|_| UpstreamError::UnexpectedShape(format!("expected a list, got {kind}")))?;

    let total = elements.len();
    let items: Vec<T> = elements
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| match serde_json::from_value(element) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index, error = %e, "Skipping unreadable upstream list entry");
                None
            }
        })
        .collect();

    if items.len() < total {
        warn!(kept = items.len(), total, "Upstream list had unreadable entries");
    }
    Ok(items)
}

/// A timestamp that reads as `None` when absent, null, or not RFC 3339.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

/// A user as upstream lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub linked_accounts: Option<Vec<Value>>,
}

impl UpstreamUser {
    /// Whether this user's email equals `email` exactly.
    #[must_use]
    pub fn email_is(&self, email: &Email) -> bool {
        self.email.as_deref() == Some(email.as_str())
    }

    /// Whether this user's email equals `email` ignoring ASCII case.
    #[must_use]
    pub fn email_matches(&self, email: &Email) -> bool {
        self.email.as_deref().is_some_and(|e| email.matches(e))
    }

    /// Local record for this user, keyed by the id upstream holds.
    #[must_use]
    pub fn to_user(&self, email: &Email) -> User {
        User {
            id: self.id.clone(),
            email: email.clone(),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// One entry of the web chat history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub id: Value,
    #[serde(default)]
    pub content: String,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub is_private: Option<bool>,
    #[serde(default)]
    pub original_message_id: Option<Value>,
    #[serde(default)]
    pub sources: Option<Vec<Value>>,
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl From<HistoryItem> for Message {
    fn from(item: HistoryItem) -> Self {
        Self {
            id: MessageId::new(value_to_string(item.id)),
            content: item.content,
            role: item.role,
            timestamp: item.created_at,
            source: item.source,
            is_private: item.is_private,
            original_message_id: item
                .original_message_id
                .filter(|v| !v.is_null())
                .map(value_to_string),
            sources: item.sources.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ids(users: &[UpstreamUser]) -> Vec<&str> {
        users.iter().map(|u| u.id.as_str()).collect()
    }

    #[test]
    fn test_normalize_items_envelope() {
        let users: Vec<UpstreamUser> =
            normalize_list(json!({"items": [{"id": "a", "email": "a@x.io"}]})).unwrap();
        assert_eq!(ids(&users), ["a"]);
    }

    #[test]
    fn test_normalize_users_envelope() {
        let users: Vec<UpstreamUser> =
            normalize_list(json!({"users": [{"id": "a"}, {"id": "b"}]})).unwrap();
        assert_eq!(ids(&users), ["a", "b"]);
    }

    #[test]
    fn test_normalize_bare_array() {
        let users: Vec<UpstreamUser> = normalize_list(json!([{"id": "z"}])).unwrap();
        assert_eq!(ids(&users), ["z"]);
    }

    #[test]
    fn test_normalize_rejects_unknown_shape() {
        let err = normalize_list::<UpstreamUser>(json!({"data": []})).unwrap_err();
        assert!(matches!(err, UpstreamError::UnexpectedShape(_)));

        let err = normalize_list::<UpstreamUser>(Value::Null).unwrap_err();
        assert!(matches!(err, UpstreamError::UnexpectedShape(_)));
    }

    #[test]
    fn test_normalize_skips_unreadable_entries() {
        let users: Vec<UpstreamUser> = normalize_list(json!({"items": [
            {"id": "a", "email": "a@x.io"},
            {"email": "no-id@x.io"},
            {"id": "b", "email": "b@x.io"}
        ]}))
        .unwrap();
        assert_eq!(ids(&users), ["a", "b"]);

        let items: Vec<HistoryItem> = normalize_list(json!([
            {"id": 1, "content": "ok", "role": "user", "created_at": "2025-06-01T10:00:00Z"},
            {"id": 2, "content": "no time", "role": "user", "created_at": null},
            {"id": 3, "content": "odd role", "role": "system", "created_at": "2025-06-01T10:00:01Z"}
        ]))
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "ok");
    }

    #[test]
    fn test_unparseable_user_timestamp_reads_as_none() {
        for created in [json!(""), json!("yesterday"), json!(null), json!(17)] {
            let user: UpstreamUser =
                serde_json::from_value(json!({"id": "bob-1", "createdAt": created})).unwrap();
            assert_eq!(user.id.as_str(), "bob-1");
            assert!(user.created_at.is_none());
        }
    }

    #[test]
    fn test_upstream_user_reads_both_date_spellings() {
        let camel: UpstreamUser =
            serde_json::from_value(json!({"id": "a", "createdAt": "2025-01-01T00:00:00Z"})).unwrap();
        let snake: UpstreamUser =
            serde_json::from_value(json!({"id": "a", "created_at": "2025-01-01T00:00:00Z"})).unwrap();
        assert_eq!(camel.created_at, snake.created_at);
        assert!(camel.created_at.is_some());
    }

    #[test]
    fn test_email_matching() {
        let user: UpstreamUser =
            serde_json::from_value(json!({"id": "a", "email": "Jane@Example.com"})).unwrap();
        let exact = Email::parse("Jane@Example.com").unwrap();
        let lower = Email::parse("jane@example.com").unwrap();

        assert!(user.email_is(&exact));
        assert!(!user.email_is(&lower));
        assert!(user.email_matches(&lower));
    }

    #[test]
    fn test_history_item_to_message() {
        let items: Vec<HistoryItem> = normalize_list(json!({"items": [{
            "id": 42,
            "content": "Hi there",
            "role": "assistant",
            "created_at": "2025-06-01T10:00:00Z",
            "source": "web",
            "is_private": false,
            "original_message_id": null,
            "sources": [{"title": "doc"}]
        }]}))
        .unwrap();

        let message = Message::from(items.into_iter().next().unwrap());
        assert_eq!(message.id.as_str(), "42");
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.source.as_deref(), Some("web"));
        assert_eq!(message.is_private, Some(false));
        assert!(message.original_message_id.is_none());
        assert_eq!(message.sources.len(), 1);
    }
}
