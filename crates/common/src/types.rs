use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wall-clock instant attached to snapshots and history entries.
pub type Timestamp = DateTime<Utc>;

/// Free-form metadata on snapshots and entries.
///
/// A `BTreeMap` so that serialized metadata has a stable key order.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Current UTC time.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Unique identifier of a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors from parsing the textual form of the closed enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown entity type: {0}")]
    EntityType(String),
    #[error("unknown change type: {0}")]
    ChangeType(String),
    #[error("unknown content type: {0}")]
    ContentType(String),
}

/// Kind of externally-owned entity whose content is versioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Project,
    Config,
    Deployment,
    UserSetting,
    ApiKey,
    Template,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        Self::File,
        Self::Project,
        Self::Config,
        Self::Deployment,
        Self::UserSetting,
        Self::ApiKey,
        Self::Template,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Project => "project",
            Self::Config => "config",
            Self::Deployment => "deployment",
            Self::UserSetting => "user_setting",
            Self::ApiKey => "api_key",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::EntityType(s.to_string()))
    }
}

/// What a history entry did to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Rename,
    Move,
    Restore,
    Merge,
    Revert,
}

impl ChangeType {
    pub const ALL: [ChangeType; 8] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Rename,
        Self::Move,
        Self::Restore,
        Self::Merge,
        Self::Revert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::Restore => "restore",
            Self::Merge => "merge",
            Self::Revert => "revert",
        }
    }

    /// Capitalized form used in generated entry messages ("Update main.py").
    pub fn title(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Rename => "Rename",
            Self::Move => "Move",
            Self::Restore => "Restore",
            Self::Merge => "Merge",
            Self::Revert => "Revert",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::ChangeType(s.to_string()))
    }
}

/// Shape of a snapshot payload. Decides how content is canonicalized,
/// hashed and rendered for diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// UTF-8 text, stored as given.
    Text,
    /// A JSON document, stored with sorted keys in compact form.
    Json,
    /// Opaque bytes.
    Binary,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [Self::Text, Self::Json, Self::Binary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::ContentType(s.to_string()))
    }
}

/// Identity of a timeline: one per `(entity_type, entity_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimelineKey {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl TimelineKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    /// Key of the derived entity `{entity_id}:branch:{name}`.
    pub fn branch(&self, name: &str) -> Self {
        Self {
            entity_type: self.entity_type,
            entity_id: format!("{}:branch:{}", self.entity_id, name),
        }
    }
}

impl fmt::Display for TimelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(SnapshotId::new(), SnapshotId::new());
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn entity_type_text_form_roundtrips() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert_eq!(
            "user_setting".parse::<EntityType>().unwrap(),
            EntityType::UserSetting
        );
        assert!(matches!(
            "folder".parse::<EntityType>(),
            Err(ParseError::EntityType(s)) if s == "folder"
        ));
    }

    #[test]
    fn change_type_serde_matches_as_str() {
        for t in ChangeType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("rewrite".parse::<ChangeType>().is_err());
    }

    #[test]
    fn change_type_title() {
        assert_eq!(ChangeType::Update.title(), "Update");
        assert_eq!(ChangeType::Revert.title(), "Revert");
    }

    #[test]
    fn content_type_parse() {
        assert_eq!("json".parse::<ContentType>().unwrap(), ContentType::Json);
        assert!("yaml".parse::<ContentType>().is_err());
    }

    #[test]
    fn timeline_key_display_and_branch() {
        let key = TimelineKey::new(EntityType::File, "main.py");
        assert_eq!(key.to_string(), "file:main.py");

        let branch = key.branch("experiment");
        assert_eq!(branch.entity_id, "main.py:branch:experiment");
        assert_eq!(branch.entity_type, EntityType::File);
    }

    #[test]
    fn timeline_keys_differ_by_type() {
        let a = TimelineKey::new(EntityType::File, "x");
        let b = TimelineKey::new(EntityType::Config, "x");
        assert_ne!(a, b);
    }
}
