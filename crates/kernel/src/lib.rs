//! History kernel: per-entity timelines, lifecycle hooks, and the
//! [`VersionHistoryManager`] that ties snapshots, diffs and storage together.
//!
//! # Invariants
//! - Within a timeline, versions start at 1 and grow by exactly one.
//! - History is append-only. Rollback appends a new `revert` version.
//! - Hook failures are logged and never change an operation's outcome.

pub mod config;
pub mod hooks;
pub mod manager;
pub mod report;
pub mod search;
pub mod timeline;

pub use config::EngineConfig;
pub use hooks::{Hook, HookDispatcher, HookError, HookEvent, HookPayload};
pub use manager::{HistoryError, SaveRequest, VersionHistoryManager};
pub use report::{
    BranchResult, ExportBundle, TimelineInfo, TimelineSummary, TimelineView, VersionComparison,
};
pub use search::{HistoryQuery, QueryMatcher};
pub use timeline::{SharedTimeline, Timeline, TimelineError, TimelineManager};
