//! Serializable results returned by the history manager.

use std::collections::{BTreeMap, BTreeSet};

use revlog_common::{ChangeType, EntityType, SnapshotId, Timestamp};
use revlog_diff::DiffStats;
use revlog_persist::{HistoryEntry, SnapshotSummary};
use serde::{Deserialize, Serialize};

/// Diff between two versions of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub version_a: u64,
    pub version_b: u64,
    /// Unified diff, empty when the versions render identically.
    pub diff: String,
    pub statistics: DiffStats,
    pub snapshot_a: SnapshotSummary,
    pub snapshot_b: SnapshotSummary,
}

/// Outcome of forking a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    pub branch_entity_id: String,
    pub branch_name: String,
    pub source_version: u64,
    pub entry: HistoryEntry,
}

/// Aggregate statistics for one timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub created_at: Timestamp,
    pub current_version: u64,
    pub total_versions: usize,
    pub change_counts: BTreeMap<ChangeType, usize>,
    pub unique_authors: BTreeSet<String>,
    pub all_tags: BTreeSet<String>,
    pub first_version: Option<HistoryEntry>,
    pub latest_version: Option<HistoryEntry>,
}

/// One row of a timeline listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineInfo {
    pub key: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub current_version: u64,
    pub total_entries: usize,
    pub created_at: Timestamp,
    pub last_modified: Option<Timestamp>,
}

/// Timeline header with its most recent entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineView {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub entity_name: String,
    pub created_at: Timestamp,
    pub current_version: u64,
    pub total_entries: usize,
    pub entries: Vec<HistoryEntry>,
}

/// Full export of one timeline for backup or transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub exported_at: Timestamp,
    pub timeline: TimelineView,
    pub entries: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<BTreeMap<SnapshotId, SnapshotSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_contents: Option<BTreeMap<SnapshotId, serde_json::Value>>,
}
