use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use revlog_common::{ChangeType, EntityType, EntryId, Metadata, TimelineKey, now};
use revlog_persist::{
    Content, ContentError, HistoryBackend, HistoryEntry, Snapshot, SnapshotStore, StoreError,
};

use crate::config::EngineConfig;
use crate::hooks::{HookDispatcher, HookError, HookEvent, HookPayload};
use crate::report::{
    BranchResult, ExportBundle, TimelineInfo, TimelineSummary, VersionComparison,
};
use crate::search::HistoryQuery;
use crate::timeline::{Timeline, TimelineError, TimelineManager};

/// Errors surfaced by the history manager.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("content could not be serialized: {0}")]
    Serialization(#[from] ContentError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt history: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("branch already exists: {0}")]
    BranchExists(String),
}

/// A new version of an entity to record.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: String,
    pub change_type: ChangeType,
    pub content: Content,
    /// Falls back to [`EngineConfig::default_author`].
    pub author: Option<String>,
    /// Falls back to `"{Change} {entity_name}"`.
    pub message: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl SaveRequest {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        change_type: ChangeType,
        content: Content,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            change_type,
            content,
            author: None,
            message: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> TimelineKey {
        TimelineKey::new(self.entity_type, self.entity_id.clone())
    }
}

/// What a commit is for. Decides the checks and metadata added under the
/// timeline lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitKind {
    Save,
    Rollback,
    Branch,
}

/// Records versions of externally owned entities and restores earlier ones.
///
/// Owns every timeline and snapshot. Writes to one timeline serialize on that
/// timeline's lock; reads and writes to other timelines run in parallel.
/// Hooks run with no lock held. When opened on a backend, every new snapshot
/// and entry is written through before it becomes visible in memory.
pub struct VersionHistoryManager {
    config: EngineConfig,
    timelines: TimelineManager,
    snapshots: SnapshotStore,
    hooks: HookDispatcher,
    backend: Option<Box<dyn HistoryBackend>>,
}

impl std::fmt::Debug for VersionHistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionHistoryManager")
            .field("config", &self.config)
            .field("timelines", &self.timelines.len())
            .field("snapshots", &self.snapshots.len())
            .field("hooks", &self.hooks)
            .field("durable", &self.backend.is_some())
            .finish()
    }
}

impl Default for VersionHistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionHistoryManager {
    /// In-memory manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            timelines: TimelineManager::new(),
            snapshots: SnapshotStore::new(),
            hooks: HookDispatcher::new(),
            backend: None,
        }
    }

    /// Rebuild state from `backend` and write all further changes through
    /// to it.
    ///
    /// Every stored snapshot must verify against its hash, every entry must
    /// reference a stored snapshot, and each timeline's versions must run
    /// without gaps. Anything else fails with [`HistoryError::Corrupt`].
    pub fn open(
        backend: impl HistoryBackend + 'static,
        config: EngineConfig,
    ) -> Result<Self, HistoryError> {
        let _span = tracing::info_span!("open").entered();
        let mut manager = Self::with_config(config);

        for snapshot in backend.load_snapshots()? {
            if !snapshot.verify() {
                return Err(HistoryError::Corrupt(format!(
                    "snapshot {} does not match its content hash",
                    snapshot.id
                )));
            }
            manager.snapshots.insert(snapshot);
        }

        let mut replayed = 0usize;
        for entry in backend.load_entries()? {
            if manager.snapshots.get(&entry.snapshot_id).is_none() {
                return Err(HistoryError::Corrupt(format!(
                    "entry {} references missing snapshot {}",
                    entry.id, entry.snapshot_id
                )));
            }
            let timeline =
                manager
                    .timelines
                    .get_or_create_at(&entry.key(), &entry.entity_name, entry.timestamp);
            timeline
                .write()
                .append(entry)
                .map_err(|e| HistoryError::Corrupt(e.to_string()))?;
            replayed += 1;
        }

        tracing::info!(
            timelines = manager.timelines.len(),
            snapshots = manager.snapshots.len(),
            entries = replayed,
            "history loaded"
        );
        manager.backend = Some(Box::new(backend));
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe `hook` to `event`.
    pub fn register_hook<F>(&self, event: HookEvent, hook: F)
    where
        F: Fn(&HookPayload<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.register(event, hook);
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub fn hook_count(&self, event: HookEvent) -> usize {
        self.hooks.hook_count(event)
    }

    /// Number of snapshots held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Record a new version. Fails only when the content cannot be
    /// canonicalized or the backend rejects the write.
    pub fn save_version(&self, request: SaveRequest) -> Result<HistoryEntry, HistoryError> {
        let _span = tracing::info_span!("save_version", key = %request.key()).entered();
        self.commit(request, CommitKind::Save)
    }

    fn commit(&self, request: SaveRequest, kind: CommitKind) -> Result<HistoryEntry, HistoryError> {
        let key = request.key();
        self.hooks.dispatch(&HookPayload::BeforeSave {
            key: &key,
            content: &request.content,
        });

        let canonical = request.content.canonicalize()?;
        let committed = loop {
            let timeline = self.timelines.get_or_create(&key, &request.entity_name);
            let mut guard = timeline.write();
            // A failed first save may have dropped this timeline while we waited.
            if !self.timelines.is_registered(&key, &timeline) {
                continue;
            }
            break self.append_locked(&mut guard, request, canonical, kind);
        };
        let (entry, snapshot) = match committed {
            Ok(committed) => committed,
            Err(err) => {
                self.timelines.remove_if_empty(&key);
                return Err(err);
            }
        };

        tracing::debug!(
            version = entry.version,
            change = entry.change_type.as_str(),
            hash = %snapshot.content_hash,
            "version saved"
        );

        self.hooks.dispatch(&HookPayload::AfterSave {
            entry: &entry,
            snapshot: &snapshot,
        });
        Ok(entry)
    }

    /// Build the entry and its snapshot against a write-locked timeline,
    /// persist both, then publish them. Nothing is published on error.
    fn append_locked(
        &self,
        timeline: &mut Timeline,
        request: SaveRequest,
        canonical: Content,
        kind: CommitKind,
    ) -> Result<(HistoryEntry, Arc<Snapshot>), HistoryError> {
        if kind == CommitKind::Branch && !timeline.is_empty() {
            return Err(HistoryError::BranchExists(timeline.key().to_string()));
        }

        let mut metadata = request.metadata;
        if kind == CommitKind::Rollback {
            metadata.insert(
                "rollback_from_version".into(),
                timeline.current_version().into(),
            );
        }
        let snapshot = Snapshot::from_canonical(canonical, metadata.clone());

        let entry = HistoryEntry {
            id: EntryId::new(),
            version: timeline.next_version(),
            change_type: request.change_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            timestamp: now(),
            author: request
                .author
                .unwrap_or_else(|| self.config.default_author.clone()),
            message: request.message.unwrap_or_else(|| {
                format!("{} {}", request.change_type.title(), request.entity_name)
            }),
            entity_name: request.entity_name,
            snapshot_id: snapshot.id,
            previous_snapshot_id: timeline.latest().map(|e| e.snapshot_id),
            tags: request.tags,
            metadata,
        };

        if let Some(backend) = &self.backend {
            backend.put_snapshot(&snapshot)?;
            backend.append_entry(&entry)?;
        }
        timeline.append(entry.clone())?;
        let snapshot = self.snapshots.insert(snapshot);
        Ok((entry, snapshot))
    }

    /// Snapshot at `version`, or the latest one when `version` is `None`.
    pub fn get_version(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: Option<u64>,
    ) -> Option<Arc<Snapshot>> {
        let entry = self.get_entry(entity_type, entity_id, version)?;
        self.snapshots.get(&entry.snapshot_id)
    }

    /// Entry at `version`, or the latest one when `version` is `None`.
    pub fn get_entry(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version: Option<u64>,
    ) -> Option<HistoryEntry> {
        let timeline = self.timelines.get(&TimelineKey::new(entity_type, entity_id))?;
        let timeline = timeline.read();
        match version {
            None => timeline.latest().cloned(),
            Some(v) => timeline.entry(v).cloned(),
        }
    }

    /// Entries newest first, skipping `offset` and returning at most `limit`.
    pub fn get_history(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        limit: usize,
        offset: usize,
    ) -> Vec<HistoryEntry> {
        let Some(timeline) = self.timelines.get(&TimelineKey::new(entity_type, entity_id)) else {
            return Vec::new();
        };
        let timeline = timeline.read();
        timeline
            .entries()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Restore the content of `target_version` as a new `revert` version.
    ///
    /// Returns `Ok(None)` without touching any state when the target version
    /// or its snapshot does not exist.
    pub fn rollback(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        target_version: u64,
        author: Option<&str>,
        message: Option<&str>,
    ) -> Result<Option<HistoryEntry>, HistoryError> {
        let key = TimelineKey::new(entity_type, entity_id);
        let _span = tracing::info_span!("rollback", %key, target_version).entered();

        let Some(timeline) = self.timelines.get(&key) else {
            return Ok(None);
        };
        let (entity_name, target_entry) = {
            let timeline = timeline.read();
            match timeline.entry(target_version) {
                Some(entry) => (timeline.entity_name().to_string(), entry.clone()),
                None => return Ok(None),
            }
        };
        let Some(target) = self.snapshots.get(&target_entry.snapshot_id) else {
            return Ok(None);
        };

        self.hooks.dispatch(&HookPayload::BeforeRollback {
            key: &key,
            target_version,
        });

        let mut request = SaveRequest::new(
            entity_type,
            entity_id,
            entity_name,
            ChangeType::Revert,
            target.content.clone(),
        )
        .message(
            message
                .map(str::to_string)
                .unwrap_or_else(|| format!("Rollback to version {target_version}")),
        )
        .tag("rollback")
        .metadata("rollback_to_version", target_version)
        .metadata("original_entry_id", target_entry.id.to_string());
        request.author = author.map(str::to_string);

        let entry = self.commit(request, CommitKind::Rollback)?;
        tracing::info!(version = entry.version, "rolled back");

        self.hooks.dispatch(&HookPayload::AfterRollback {
            entry: &entry,
            target_version,
        });
        Ok(Some(entry))
    }

    /// Diff two versions of one entity.
    pub fn compare_versions(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        version_a: u64,
        version_b: u64,
    ) -> Result<VersionComparison, HistoryError> {
        let key = TimelineKey::new(entity_type, entity_id);
        let lookup = |version: u64| {
            self.get_version(entity_type, entity_id, Some(version))
                .ok_or_else(|| HistoryError::NotFound(format!("version {version} of {key}")))
        };
        let snapshot_a = lookup(version_a)?;
        let snapshot_b = lookup(version_b)?;

        let diff = revlog_diff::diff_snapshots(
            &snapshot_a,
            &snapshot_b,
            &format!("version_{version_a}"),
            &format!("version_{version_b}"),
            &self.config.diff_options(),
        );

        Ok(VersionComparison {
            version_a,
            version_b,
            diff: diff.text,
            statistics: diff.stats,
            snapshot_a: snapshot_a.summary(),
            snapshot_b: snapshot_b.summary(),
        })
    }

    /// Scan every timeline for entries matching `query`, newest first.
    pub fn search_history(&self, query: &HistoryQuery) -> Vec<HistoryEntry> {
        let matcher = query.matcher();
        let mut results: Vec<HistoryEntry> = Vec::new();
        for timeline in self.timelines.all() {
            let timeline = timeline.read();
            results.extend(
                timeline
                    .entries()
                    .iter()
                    .filter(|e| matcher.matches(e))
                    .cloned(),
            );
        }
        results.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.version.cmp(&a.version))
        });
        results.truncate(query.limit.unwrap_or(self.config.search_limit));
        results
    }

    /// Fork `{entity_id}:branch:{branch_name}` from `from_version` (latest
    /// when `None`).
    ///
    /// Returns `Ok(None)` when the source version does not exist and
    /// [`HistoryError::BranchExists`] when the branch already has history.
    pub fn create_branch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        branch_name: &str,
        from_version: Option<u64>,
    ) -> Result<Option<BranchResult>, HistoryError> {
        let key = TimelineKey::new(entity_type, entity_id);
        let _span = tracing::info_span!("create_branch", %key, branch = branch_name).entered();

        let Some(source) = self.timelines.get(&key) else {
            return Ok(None);
        };
        let (source_name, source_entry) = {
            let source = source.read();
            let entry = match from_version {
                None => source.latest(),
                Some(v) => source.entry(v),
            };
            match entry {
                Some(entry) => (source.entity_name().to_string(), entry.clone()),
                None => return Ok(None),
            }
        };
        let Some(snapshot) = self.snapshots.get(&source_entry.snapshot_id) else {
            return Ok(None);
        };

        let branch_key = key.branch(branch_name);
        if self
            .timelines
            .get(&branch_key)
            .is_some_and(|t| !t.read().is_empty())
        {
            return Err(HistoryError::BranchExists(branch_key.to_string()));
        }

        let from_label = from_version.map_or_else(|| "latest".to_string(), |v| v.to_string());
        let request = SaveRequest::new(
            entity_type,
            branch_key.entity_id.clone(),
            format!("{source_name} ({branch_name})"),
            ChangeType::Create,
            snapshot.content.clone(),
        )
        .message(format!("Branch '{branch_name}' created from version {from_label}"))
        .tags(["branch", branch_name])
        .metadata("source_entity_id", entity_id)
        .metadata("source_version", source_entry.version)
        .metadata("branch_name", branch_name);

        let entry = self.commit(request, CommitKind::Branch)?;
        tracing::info!(branch = %branch_key, source_version = source_entry.version, "branch created");

        Ok(Some(BranchResult {
            branch_entity_id: branch_key.entity_id,
            branch_name: branch_name.to_string(),
            source_version: source_entry.version,
            entry,
        }))
    }

    /// Aggregate statistics for one timeline; `None` for an unknown key.
    pub fn get_timeline_summary(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Option<TimelineSummary> {
        let timeline = self.timelines.get(&TimelineKey::new(entity_type, entity_id))?;
        let timeline = timeline.read();
        if timeline.is_empty() {
            return None;
        }

        let mut change_counts = BTreeMap::new();
        let mut unique_authors = BTreeSet::new();
        let mut all_tags = BTreeSet::new();
        for entry in timeline.entries() {
            *change_counts.entry(entry.change_type).or_insert(0) += 1;
            unique_authors.insert(entry.author.clone());
            all_tags.extend(entry.tags.iter().cloned());
        }

        Some(TimelineSummary {
            entity_id: timeline.entity_id().to_string(),
            entity_type: timeline.entity_type(),
            entity_name: timeline.entity_name().to_string(),
            created_at: timeline.created_at(),
            current_version: timeline.current_version(),
            total_versions: timeline.len(),
            change_counts,
            unique_authors,
            all_tags,
            first_version: timeline.first().cloned(),
            latest_version: timeline.latest().cloned(),
        })
    }

    /// Export one timeline, optionally with its snapshots and their content.
    pub fn export_timeline(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        include_snapshots: bool,
    ) -> Result<ExportBundle, HistoryError> {
        let key = TimelineKey::new(entity_type, entity_id);
        let timeline = self
            .timelines
            .get(&key)
            .ok_or_else(|| HistoryError::NotFound(format!("timeline {key}")))?;
        let timeline = timeline.read();
        if timeline.is_empty() {
            return Err(HistoryError::NotFound(format!("timeline {key}")));
        }

        let (snapshots, snapshot_contents) = if include_snapshots {
            let mut summaries = BTreeMap::new();
            let mut contents = BTreeMap::new();
            for entry in timeline.entries() {
                if let Some(snapshot) = self.snapshots.get(&entry.snapshot_id) {
                    summaries.insert(snapshot.id, snapshot.summary());
                    contents.insert(snapshot.id, snapshot.content.to_json_value());
                }
            }
            (Some(summaries), Some(contents))
        } else {
            (None, None)
        };

        Ok(ExportBundle {
            exported_at: now(),
            timeline: timeline.view(self.config.export_recent_entries),
            entries: timeline.entries().to_vec(),
            snapshots,
            snapshot_contents,
        })
    }

    /// One row per timeline, sorted by key.
    pub fn list_timelines(&self) -> Vec<TimelineInfo> {
        self.timelines
            .all()
            .iter()
            .filter_map(|timeline| {
                let timeline = timeline.read();
                (!timeline.is_empty()).then(|| timeline.info())
            })
            .collect()
    }
}
