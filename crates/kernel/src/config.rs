use revlog_diff::DiffOptions;
use serde::{Deserialize, Serialize};

/// Engine-wide defaults. Every field has a default, so a partial config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Author recorded when a request does not name one.
    pub default_author: String,
    /// Page size for history listings when the caller gives none.
    pub history_page_size: usize,
    /// Result cap for history searches without an explicit limit.
    pub search_limit: usize,
    /// Unchanged lines shown around each diff hunk.
    pub diff_context: usize,
    /// Entries included in the timeline view of an export.
    pub export_recent_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_author: "system".into(),
            history_page_size: 50,
            search_limit: 50,
            diff_context: 3,
            export_recent_entries: 10,
        }
    }
}

impl EngineConfig {
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            context_radius: self.diff_context,
        }
    }
}
