use revlog_common::{ChangeType, EntityType, Timestamp};
use revlog_persist::HistoryEntry;
use serde::{Deserialize, Serialize};

/// Filters for a history search. Unset fields match everything; set fields
/// must all match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    /// Case-insensitive substring of the entry message.
    pub text: Option<String>,
    pub entity_type: Option<EntityType>,
    pub change_type: Option<ChangeType>,
    /// Exact author.
    pub author: Option<String>,
    /// Entry must carry at least one of these.
    pub tags: Vec<String>,
    /// Inclusive lower bound on the entry timestamp.
    pub start_date: Option<Timestamp>,
    /// Inclusive upper bound on the entry timestamp.
    pub end_date: Option<Timestamp>,
    /// Result cap. Falls back to the engine's search limit.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = Some(change_type);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn start_date(mut self, start: Timestamp) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn end_date(mut self, end: Timestamp) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compile the query for repeated matching.
    pub fn matcher(&self) -> QueryMatcher<'_> {
        QueryMatcher {
            query: self,
            needle: self
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(str::to_lowercase),
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.matcher().matches(entry)
    }
}

/// A [`HistoryQuery`] with its text filter lowercased once.
#[derive(Debug)]
pub struct QueryMatcher<'a> {
    query: &'a HistoryQuery,
    needle: Option<String>,
}

impl QueryMatcher<'_> {
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        let q = self.query;
        if q.entity_type.is_some_and(|t| t != entry.entity_type) {
            return false;
        }
        if q.change_type.is_some_and(|c| c != entry.change_type) {
            return false;
        }
        if q.author.as_deref().is_some_and(|a| a != entry.author) {
            return false;
        }
        if !q.tags.is_empty() && !q.tags.iter().any(|t| entry.has_tag(t)) {
            return false;
        }
        if q.start_date.is_some_and(|start| entry.timestamp < start) {
            return false;
        }
        if q.end_date.is_some_and(|end| entry.timestamp > end) {
            return false;
        }
        match &self.needle {
            Some(needle) => entry.message.to_lowercase().contains(needle.as_str()),
            None => true,
        }
    }
}
