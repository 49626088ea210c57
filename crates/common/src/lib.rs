//! Shared vocabulary for the revlog engine.
//!
//! Every other crate names entities, versions and snapshots through the types
//! defined here, so the closed enums are the single source of truth for what
//! the engine can version.

mod types;

pub use types::{
    ChangeType, ContentType, EntityType, EntryId, Metadata, ParseError, SnapshotId, TimelineKey,
    Timestamp, now,
};
