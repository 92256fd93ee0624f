//! Replica (hosted chatbot) records.
//!
//! Field names follow the upstream JSON exactly, including the odd `ownerID`
//! and the snake-case `created_at` on listed replicas.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ReplicaId, UserId};

/// Kind of persona a replica represents.
///
/// Written in lower case; read in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ReplicaType {
    #[default]
    Individual,
    Character,
    Brand,
}

impl std::fmt::Display for ReplicaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Character => write!(f, "character"),
            Self::Brand => write!(f, "brand"),
        }
    }
}

impl std::str::FromStr for ReplicaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" => Ok(Self::Individual),
            "character" => Ok(Self::Character),
            "brand" => Ok(Self::Brand),
            _ => Err(format!("invalid replica type: {s}")),
        }
    }
}

impl TryFrom<String> for ReplicaType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Language model settings of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Model name, e.g. `gpt-4o` or `claude-3-7-sonnet-latest`.
    pub model: String,
    /// Personality prompt.
    pub system_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

/// A replica as listed by upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    pub uuid: ReplicaId,
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub greeting: String,
    #[serde(rename = "type", default)]
    pub replica_type: ReplicaType,
    #[serde(rename = "ownerID")]
    pub owner_id: UserId,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_questions: Vec<String>,
    pub llm: LlmConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(
        rename = "chat_history_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_history_count: Option<u64>,
}

/// Payload for creating a replica.
///
/// Only `name`, `ownerID` and `llm` are required here. Missing display text
/// is left out of the forwarded payload so upstream applies its own rules,
/// and a missing `type` means [`ReplicaType::Individual`]. Fields this crate
/// does not model are kept in `extra` and forwarded to upstream unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReplica {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub greeting: String,
    #[serde(rename = "type", default)]
    pub replica_type: ReplicaType,
    #[serde(rename = "ownerID")]
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub llm: LlmConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_replica_forwards_unknown_fields() {
        let payload = serde_json::json!({
            "name": "Ada",
            "shortDescription": "Mathematician",
            "greeting": "Hello!",
            "type": "character",
            "ownerID": "adaexamplecom_0123456789ab",
            "llm": { "model": "gpt-4o", "systemMessage": "You are Ada." },
            "profileImage": "https://img.example.com/ada.png",
            "private": true
        });

        let replica: NewReplica = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(replica.replica_type, ReplicaType::Character);
        assert_eq!(replica.owner_id.as_str(), "adaexamplecom_0123456789ab");
        assert_eq!(replica.extra["private"], true);

        let back = serde_json::to_value(&replica).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_new_replica_fills_in_display_fields() {
        let payload = serde_json::json!({
            "name": "Ada",
            "type": "Character",
            "ownerID": "adaexamplecom_0123456789ab",
            "llm": { "model": "gpt-4o", "systemMessage": "You are Ada." }
        });

        let replica: NewReplica = serde_json::from_value(payload).unwrap();
        assert_eq!(replica.replica_type, ReplicaType::Character);
        assert!(replica.greeting.is_empty());
        assert!(replica.short_description.is_empty());

        let back = serde_json::to_value(&replica).unwrap();
        assert_eq!(back["type"], "character");
        assert!(back.get("greeting").is_none());
        assert!(back.get("shortDescription").is_none());
    }

    #[test]
    fn test_new_replica_still_needs_name_owner_and_llm() {
        let full = serde_json::json!({
            "name": "Ada",
            "ownerID": "adaexamplecom_0123456789ab",
            "llm": { "model": "gpt-4o", "systemMessage": "You are Ada." }
        });
        let replica: NewReplica = serde_json::from_value(full.clone()).unwrap();
        assert_eq!(replica.replica_type, ReplicaType::Individual);

        for field in ["name", "ownerID", "llm"] {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(field);
            assert!(serde_json::from_value::<NewReplica>(partial).is_err(), "{field}");
        }

        let mut robot = full;
        robot["type"] = "robot".into();
        assert!(serde_json::from_value::<NewReplica>(robot).is_err());
    }

    #[test]
    fn test_replica_type_parse() {
        assert_eq!("brand".parse::<ReplicaType>().unwrap(), ReplicaType::Brand);
        assert_eq!(" BRAND ".parse::<ReplicaType>().unwrap(), ReplicaType::Brand);
        assert!("robot".parse::<ReplicaType>().is_err());
        assert_eq!(ReplicaType::Individual.to_string(), "individual");
    }

    #[test]
    fn test_listed_replica_tolerates_sparse_fields() {
        let replica: Replica = serde_json::from_value(serde_json::json!({
            "uuid": "3c5e",
            "name": "Bot",
            "ownerID": "owner_1",
            "llm": { "model": "gpt-5-mini", "systemMessage": "" },
            "created_at": "2025-05-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(replica.replica_type, ReplicaType::Individual);
        assert!(replica.tags.is_empty());
        assert_eq!(replica.created_at.as_deref(), Some("2025-05-01T00:00:00Z"));
    }
}
