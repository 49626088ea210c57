//! Persistence: content-addressed snapshots, history entry rows, and the
//! backends that hold them durably.
//!
//! # Invariants
//! - Snapshots are immutable and verifiable against their content hash.
//! - Both relations (snapshots, history entries) are append-only.
//! - The file store fails closed on schema mismatch or a broken hash chain.

pub mod backend;
pub mod record;
pub mod snapshot;
pub mod store;

pub use backend::{HistoryBackend, MemoryBackend};
pub use record::HistoryEntry;
pub use snapshot::{
    CONTENT_HASH_LEN, Content, ContentError, Snapshot, SnapshotStore, SnapshotSummary,
    content_hash,
};
pub use store::{FileStore, StoreConfig, StoreError, StoreMeta};
