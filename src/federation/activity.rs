//! ActivityStreams vocabulary
//!
//! Typed views over the activities and objects this server exchanges.
//! Incoming payloads are parsed lazily from the raw bytes kept by the
//! object store, so unknown fields survive in storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::context::JsonLdContext;

pub const ACTIVITYSTREAMS: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_V1: &str = "https://w3id.org/security/v1";
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Activity types the inbox knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Follow,
    Undo,
    Accept,
    Create,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "Follow",
            Self::Undo => "Undo",
            Self::Accept => "Accept",
            Self::Create => "Create",
        }
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Follow" => Ok(Self::Follow),
            "Undo" => Ok(Self::Undo),
            "Accept" => Ok(Self::Accept),
            "Create" => Ok(Self::Create),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `object` given either as a URI or as an embedded object with an `id`.
fn object_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    value
        .as_str()
        .or_else(|| value.get("id").and_then(serde_json::Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| D::Error::custom("object must be a URI or an object with an id"))
}

// =============================================================================
// Activities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    /// Followed resource
    #[serde(deserialize_with = "object_id")]
    pub object: String,
}

/// Undo of an earlier activity, embedded or referenced by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Undo {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub object: serde_json::Value,
}

impl Undo {
    /// Id of the undone activity.
    pub fn object_id(&self) -> Option<&str> {
        self.object
            .as_str()
            .or_else(|| self.object.get("id").and_then(serde_json::Value::as_str))
    }

    /// Embedded activity type; `None` when only an id was given.
    pub fn object_type(&self) -> Option<&str> {
        self.object.get("type").and_then(serde_json::Value::as_str)
    }

    pub fn is_reference(&self) -> bool {
        self.object.is_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub object: Follow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNote {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    pub object: Note,
}

impl CreateNote {
    /// Union of `to` and `cc` of the activity and its note, first occurrence order.
    pub fn recipients(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.object.to.iter())
            .chain(self.object.cc.iter())
            .map(String::as_str)
            .filter(|r| seen.insert(*r))
            .collect()
    }
}

/// Parsed inbound activity
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Follow(Follow),
    Undo(Undo),
    Accept(Accept),
    Create(CreateNote),
}

impl Activity {
    /// Parse raw bytes according to their declared `type`.
    ///
    /// Returns `Ok(None)` for types the inbox does not handle.
    pub fn parse(kind: &str, raw: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let Ok(kind) = kind.parse::<ActivityType>() else {
            return Ok(None);
        };
        Ok(Some(match kind {
            ActivityType::Follow => Self::Follow(serde_json::from_slice(raw)?),
            ActivityType::Undo => Self::Undo(serde_json::from_slice(raw)?),
            ActivityType::Accept => Self::Accept(serde_json::from_slice(raw)?),
            ActivityType::Create => Self::Create(serde_json::from_slice(raw)?),
        }))
    }

    pub fn activity_type(&self) -> ActivityType {
        match self {
            Self::Follow(_) => ActivityType::Follow,
            Self::Undo(_) => ActivityType::Undo,
            Self::Accept(_) => ActivityType::Accept,
            Self::Create(_) => ActivityType::Create,
        }
    }
}

// =============================================================================
// Objects
// =============================================================================

/// Short post; page-change notifications and talk replies.
///
/// `summary`, `inReplyTo`, `to` and `cc` are always serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actor: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attributed_to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    pub owner: String,
    pub public_key_pem: String,
}

/// Local or remote actor document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "@context", default, skip_serializing_if = "JsonLdContext::is_empty")]
    pub context: JsonLdContext,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub summary: String,
    pub inbox: String,
    #[serde(default)]
    pub outbox: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub following: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub followers: String,
    #[serde(default)]
    pub public_key: PublicKey,
}

impl Actor {
    /// `@user@host`, or the bare id when either part is missing.
    pub fn mention_name(&self) -> String {
        if self.preferred_username.is_empty() {
            return self.id.clone();
        }
        match url::Url::parse(&self.id)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            Some(host) => format!("@{}@{}", self.preferred_username, host),
            None => self.id.clone(),
        }
    }
}
