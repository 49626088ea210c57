use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use revlog_common::{EntityType, TimelineKey, Timestamp, now};
use revlog_persist::HistoryEntry;

use crate::report::{TimelineInfo, TimelineView};

/// Rejected appends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("version gap on {key}: expected v{expected}, got v{found}")]
    VersionGap {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("entry for {found} appended to timeline {expected}")]
    KeyMismatch { expected: String, found: String },
}

/// Ordered, append-only history of one entity.
///
/// `current_version` always equals the version of the last entry (0 when
/// empty), and versions run 1, 2, 3, ... without gaps.
#[derive(Debug, Clone)]
pub struct Timeline {
    key: TimelineKey,
    entity_name: String,
    created_at: Timestamp,
    entries: Vec<HistoryEntry>,
    current_version: u64,
}

impl Timeline {
    pub fn new(key: TimelineKey, entity_name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            key,
            entity_name: entity_name.into(),
            created_at,
            entries: Vec::new(),
            current_version: 0,
        }
    }

    pub fn key(&self) -> &TimelineKey {
        &self.key
    }

    pub fn entity_type(&self) -> EntityType {
        self.key.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.key.entity_id
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    /// Version the next append must carry.
    pub fn next_version(&self) -> u64 {
        self.current_version + 1
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// Entry with the given version (linear scan).
    pub fn entry(&self, version: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.version == version)
    }

    /// Append `entry`, which must belong to this timeline and carry
    /// [`next_version`](Self::next_version).
    pub fn append(&mut self, entry: HistoryEntry) -> Result<(), TimelineError> {
        if entry.entity_type != self.key.entity_type || entry.entity_id != self.key.entity_id {
            return Err(TimelineError::KeyMismatch {
                expected: self.key.to_string(),
                found: entry.key().to_string(),
            });
        }
        if entry.version != self.next_version() {
            return Err(TimelineError::VersionGap {
                key: self.key.to_string(),
                expected: self.next_version(),
                found: entry.version,
            });
        }
        self.current_version = entry.version;
        self.entries.push(entry);
        Ok(())
    }

    /// Listing row for this timeline.
    pub fn info(&self) -> TimelineInfo {
        TimelineInfo {
            key: self.key.to_string(),
            entity_id: self.key.entity_id.clone(),
            entity_type: self.key.entity_type,
            entity_name: self.entity_name.clone(),
            current_version: self.current_version,
            total_entries: self.entries.len(),
            created_at: self.created_at,
            last_modified: self.latest().map(|e| e.timestamp),
        }
    }

    /// Serializable view with the `recent` newest entries, oldest first.
    pub fn view(&self, recent: usize) -> TimelineView {
        let start = self.entries.len().saturating_sub(recent);
        TimelineView {
            entity_id: self.key.entity_id.clone(),
            entity_type: self.key.entity_type,
            entity_name: self.entity_name.clone(),
            created_at: self.created_at,
            current_version: self.current_version,
            total_entries: self.entries.len(),
            entries: self.entries[start..].to_vec(),
        }
    }
}

/// A timeline behind its own lock. Writers to one key serialize here;
/// other keys are unaffected.
pub type SharedTimeline = Arc<RwLock<Timeline>>;

/// Registry of every timeline, keyed by `(entity_type, entity_id)`.
#[derive(Debug, Default)]
pub struct TimelineManager {
    timelines: DashMap<TimelineKey, SharedTimeline>,
}

impl TimelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing timeline for `key`, or a new empty one named `entity_name`.
    pub fn get_or_create(&self, key: &TimelineKey, entity_name: &str) -> SharedTimeline {
        self.get_or_create_at(key, entity_name, now())
    }

    /// Like [`get_or_create`](Self::get_or_create), stamping a new timeline
    /// with `created_at`. Used when replaying stored entries.
    pub fn get_or_create_at(
        &self,
        key: &TimelineKey,
        entity_name: &str,
        created_at: Timestamp,
    ) -> SharedTimeline {
        if let Some(existing) = self.timelines.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.timelines.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(%key, "timeline created");
            Arc::new(RwLock::new(Timeline::new(
                key.clone(),
                entity_name,
                created_at,
            )))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &TimelineKey) -> Option<SharedTimeline> {
        self.timelines.get(key).map(|t| Arc::clone(t.value()))
    }

    /// Whether `timeline` is still the one registered under `key`.
    pub fn is_registered(&self, key: &TimelineKey, timeline: &SharedTimeline) -> bool {
        self.timelines
            .get(key)
            .is_some_and(|t| Arc::ptr_eq(t.value(), timeline))
    }

    /// Drop the timeline for `key` if it holds no entries. A timeline
    /// locked by a writer is left alone.
    pub fn remove_if_empty(&self, key: &TimelineKey) -> bool {
        let removed = self
            .timelines
            .remove_if(key, |_, t| t.try_read().is_some_and(|t| t.is_empty()))
            .is_some();
        if removed {
            tracing::debug!(%key, "empty timeline dropped");
        }
        removed
    }

    /// Every timeline, sorted by key.
    pub fn all(&self) -> Vec<SharedTimeline> {
        let mut all: Vec<(TimelineKey, SharedTimeline)> = self
            .timelines
            .iter()
            .map(|t| (t.key().clone(), Arc::clone(t.value())))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().map(|(_, timeline)| timeline).collect()
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revlog_common::{ChangeType, EntryId, Metadata, SnapshotId};

    fn key() -> TimelineKey {
        TimelineKey::new(EntityType::File, "main.py")
    }

    fn entry(version: u64) -> HistoryEntry {
        HistoryEntry {
            id: EntryId::new(),
            version,
            change_type: ChangeType::Update,
            entity_type: EntityType::File,
            entity_id: "main.py".into(),
            entity_name: "main.py".into(),
            timestamp: now(),
            author: "system".into(),
            message: String::new(),
            snapshot_id: SnapshotId::new(),
            previous_snapshot_id: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn append_advances_current_version() {
        let mut timeline = Timeline::new(key(), "main.py", now());
        assert_eq!(timeline.current_version(), 0);
        assert!(timeline.latest().is_none());

        for v in 1..=3 {
            timeline.append(entry(v)).unwrap();
        }
        assert_eq!(timeline.current_version(), 3);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.first().unwrap().version, 1);
        assert_eq!(timeline.entry(2).unwrap().version, 2);
        assert!(timeline.entry(4).is_none());
    }

    #[test]
    fn version_gap_is_rejected() {
        let mut timeline = Timeline::new(key(), "main.py", now());
        timeline.append(entry(1)).unwrap();

        let err = timeline.append(entry(3)).unwrap_err();
        assert_eq!(
            err,
            TimelineError::VersionGap {
                key: "file:main.py".into(),
                expected: 2,
                found: 3,
            }
        );
        assert!(timeline.append(entry(1)).is_err());
        assert_eq!(timeline.current_version(), 1);
    }

    #[test]
    fn foreign_entry_is_rejected() {
        let mut timeline = Timeline::new(TimelineKey::new(EntityType::Config, "main.py"), "x", now());
        assert!(matches!(
            timeline.append(entry(1)),
            Err(TimelineError::KeyMismatch { .. })
        ));
        assert!(timeline.is_empty());
    }

    #[test]
    fn view_keeps_most_recent_entries() {
        let mut timeline = Timeline::new(key(), "main.py", now());
        for v in 1..=12 {
            timeline.append(entry(v)).unwrap();
        }
        let view = timeline.view(10);
        assert_eq!(view.total_entries, 12);
        assert_eq!(view.entries.len(), 10);
        assert_eq!(view.entries[0].version, 3);
        assert_eq!(view.entries[9].version, 12);

        let info = timeline.info();
        assert_eq!(info.key, "file:main.py");
        assert_eq!(info.last_modified, Some(timeline.latest().unwrap().timestamp));
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let manager = TimelineManager::new();
        let a = manager.get_or_create(&key(), "main.py");
        let b = manager.get_or_create(&key(), "renamed.py");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.read().entity_name(), "main.py");
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&TimelineKey::new(EntityType::File, "other")).is_none());
    }

    #[test]
    fn all_is_sorted_by_key() {
        let manager = TimelineManager::new();
        manager.get_or_create(&TimelineKey::new(EntityType::Template, "b"), "b");
        manager.get_or_create(&TimelineKey::new(EntityType::File, "z"), "z");
        manager.get_or_create(&TimelineKey::new(EntityType::File, "a"), "a");

        let keys: Vec<String> = manager
            .all()
            .iter()
            .map(|t| t.read().key().to_string())
            .collect();
        assert_eq!(keys, vec!["file:a", "file:z", "template:b"]);
    }

    #[test]
    fn remove_if_empty_keeps_populated_and_locked_timelines() {
        let manager = TimelineManager::new();
        let empty = manager.get_or_create(&key(), "main.py");
        let populated_key = TimelineKey::new(EntityType::File, "kept");
        let populated = manager.get_or_create(&populated_key, "kept");
        let mut first = entry(1);
        first.entity_id = "kept".into();
        populated.write().append(first).unwrap();

        {
            let _writer = empty.write();
            assert!(!manager.remove_if_empty(&key()));
        }
        assert!(manager.is_registered(&key(), &empty));

        assert!(manager.remove_if_empty(&key()));
        assert!(!manager.remove_if_empty(&populated_key));
        assert!(manager.get(&key()).is_none());
        assert!(!manager.is_registered(&key(), &empty));
        assert!(manager.is_registered(&populated_key, &populated));
        assert_eq!(manager.len(), 1);
    }
}
