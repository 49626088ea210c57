//! Diff engine: renders snapshot content as lines and produces a unified
//! diff together with added/removed line counts.
//!
//! # Invariants
//! - `diff(x, x)` is empty with zero counts.
//! - Swapping the inputs swaps `lines_added` and `lines_removed`; the total
//!   stays the same.
//! - Counts never include the `---`/`+++` header or `@@` hunk markers.

use revlog_common::ContentType;
use revlog_persist::{Content, Snapshot};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Bytes per line when rendering binary content.
pub const BINARY_LINE_WIDTH: usize = 16;

/// Tuning for diff output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    /// Unchanged lines shown around each change.
    pub context_radius: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { context_radius: 3 }
    }
}

/// Line counts for a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub total_changes: usize,
}

/// Unified diff text plus its statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOutput {
    pub text: String,
    pub stats: DiffStats,
}

impl DiffOutput {
    pub fn is_empty(&self) -> bool {
        self.stats.total_changes == 0
    }
}

/// Render content as diffable text.
///
/// Text is used as-is. JSON is pretty printed with sorted keys and a
/// 2-space indent. Binary becomes hex, [`BINARY_LINE_WIDTH`] bytes per line.
pub fn render(content: &Content) -> String {
    match content.content_type {
        ContentType::Text => String::from_utf8_lossy(&content.bytes).into_owned(),
        ContentType::Json => render_json(content),
        ContentType::Binary => content
            .bytes
            .chunks(BINARY_LINE_WIDTH)
            .map(|chunk| format!("{}\n", hex::encode(chunk)))
            .collect(),
    }
}

fn render_json(content: &Content) -> String {
    // Stored JSON is already canonical, so parsing yields sorted keys.
    match serde_json::from_slice::<serde_json::Value>(&content.bytes)
        .and_then(|value| serde_json::to_string_pretty(&value))
    {
        Ok(mut pretty) => {
            pretty.push('\n');
            pretty
        }
        Err(_) => String::from_utf8_lossy(&content.bytes).into_owned(),
    }
}

/// Diff two rendered texts line by line.
pub fn diff_text(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
    options: &DiffOptions,
) -> DiffOutput {
    let diff = TextDiff::from_lines(old, new);

    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.lines_added += 1,
            ChangeTag::Delete => stats.lines_removed += 1,
            ChangeTag::Equal => {}
        }
    }
    stats.total_changes = stats.lines_added + stats.lines_removed;

    if stats.total_changes == 0 {
        return DiffOutput::default();
    }

    let text = diff
        .unified_diff()
        .context_radius(options.context_radius)
        .header(old_label, new_label)
        .to_string();

    tracing::trace!(
        added = stats.lines_added,
        removed = stats.lines_removed,
        "diff computed"
    );

    DiffOutput { text, stats }
}

/// Diff the content of two snapshots.
pub fn diff_snapshots(
    old: &Snapshot,
    new: &Snapshot,
    old_label: &str,
    new_label: &str,
    options: &DiffOptions,
) -> DiffOutput {
    diff_text(
        &render(&old.content),
        &render(&new.content),
        old_label,
        new_label,
        options,
    )
}
