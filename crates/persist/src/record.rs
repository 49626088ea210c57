use revlog_common::{
    ChangeType, EntityType, EntryId, Metadata, SnapshotId, TimelineKey, Timestamp,
};
use serde::{Deserialize, Serialize};

/// One version transition of an entity: who, when, why, and which snapshot.
///
/// Entries are append-only rows. Within a timeline `version` starts at 1 and
/// grows by exactly one per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub version: u64,
    pub change_type: ChangeType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: String,
    pub timestamp: Timestamp,
    pub author: String,
    pub message: String,
    pub snapshot_id: SnapshotId,
    pub previous_snapshot_id: Option<SnapshotId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl HistoryEntry {
    /// Key of the timeline this entry belongs to.
    pub fn key(&self) -> TimelineKey {
        TimelineKey::new(self.entity_type, self.entity_id.clone())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
