use parking_lot::Mutex;

use crate::record::HistoryEntry;
use crate::snapshot::Snapshot;
use crate::store::StoreError;

/// Durable home for the two append-only relations: `snapshots` and
/// `history_entries`.
///
/// Writes are append-only. `load_entries` must return entries in the order
/// they were appended, so that replaying them rebuilds every timeline with
/// its versions in sequence.
pub trait HistoryBackend: Send + Sync {
    /// Persist a snapshot row.
    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Persist a history entry row.
    fn append_entry(&self, entry: &HistoryEntry) -> Result<(), StoreError>;

    /// All snapshot rows.
    fn load_snapshots(&self) -> Result<Vec<Snapshot>, StoreError>;

    /// All entry rows in append order.
    fn load_entries(&self) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Backend that keeps rows in memory. Useful for tests and for handing
/// state between two engine instances within one process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshots: Mutex<Vec<Snapshot>>,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl HistoryBackend for MemoryBackend {
    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }

    fn append_entry(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn load_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self.snapshots.lock().clone())
    }

    fn load_entries(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }
}

// Lets callers keep a handle on a backend they pass to the engine.
impl<B: HistoryBackend + ?Sized> HistoryBackend for std::sync::Arc<B> {
    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        (**self).put_snapshot(snapshot)
    }

    fn append_entry(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        (**self).append_entry(entry)
    }

    fn load_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        (**self).load_snapshots()
    }

    fn load_entries(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        (**self).load_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Content;
    use revlog_common::{ChangeType, EntityType, EntryId, Metadata};

    #[test]
    fn memory_backend_keeps_append_order() {
        let backend = MemoryBackend::new();
        let snap = Snapshot::create(&Content::text("v"), Metadata::new()).unwrap();
        backend.put_snapshot(&snap).unwrap();

        for version in 1..=3 {
            backend
                .append_entry(&HistoryEntry {
                    id: EntryId::new(),
                    version,
                    change_type: ChangeType::Update,
                    entity_type: EntityType::File,
                    entity_id: "a".into(),
                    entity_name: "a".into(),
                    timestamp: revlog_common::now(),
                    author: "system".into(),
                    message: String::new(),
                    snapshot_id: snap.id,
                    previous_snapshot_id: None,
                    tags: Vec::new(),
                    metadata: Metadata::new(),
                })
                .unwrap();
        }

        let versions: Vec<u64> = backend
            .load_entries()
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(backend.snapshot_count(), 1);
        assert_eq!(backend.entry_count(), 3);
    }

    #[test]
    fn shared_backend_forwards() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let handle: &dyn HistoryBackend = &backend;
        let snap = Snapshot::create(&Content::text("x"), Metadata::new()).unwrap();
        handle.put_snapshot(&snap).unwrap();
        assert_eq!(backend.snapshot_count(), 1);
    }
}
