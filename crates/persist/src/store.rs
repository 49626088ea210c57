//! File-backed history store.
//!
//! Layout inside the store directory:
//! ```text
//! revlog.meta.json            - schema version and segment counters
//! snapshots/
//!   000001.snap.cbor.zst      - one CBOR+zstd compressed snapshot row
//! entries/
//!   000001.entry.cbor.zst     - one CBOR+zstd compressed history entry row
//! integrity/
//!   manifest.json             - hash chain over every segment, in write order
//! ```

use std::collections::HashMap;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backend::HistoryBackend;
use crate::record::HistoryEntry;
use crate::snapshot::Snapshot;

/// Current on-disk schema version.
const SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "revlog.meta.json";
const MANIFEST_FILE: &str = "manifest.json";

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("segment {0} is not listed in the integrity manifest")]
    Unlisted(String),
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
}

/// Tuning for the file-backed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// zstd compression level for segments.
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
        }
    }
}

/// Metadata stored in `revlog.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub snapshot_count: u64,
    pub entry_count: u64,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking all segment hashes in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Snapshot,
    Entry,
}

impl SegmentKind {
    fn dir(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshots",
            Self::Entry => "entries",
        }
    }

    fn filename(self, index: u64) -> String {
        match self {
            Self::Snapshot => format!("{index:06}.snap.cbor.zst"),
            Self::Entry => format!("{index:06}.entry.cbor.zst"),
        }
    }

    fn of_filename(filename: &str) -> Self {
        if filename.contains(".snap.") {
            Self::Snapshot
        } else {
            Self::Entry
        }
    }

    fn count(self, meta: &StoreMeta) -> u64 {
        match self {
            Self::Snapshot => meta.snapshot_count,
            Self::Entry => meta.entry_count,
        }
    }

    fn count_mut(self, meta: &mut StoreMeta) -> &mut u64 {
        match self {
            Self::Snapshot => &mut meta.snapshot_count,
            Self::Entry => &mut meta.entry_count,
        }
    }
}

#[derive(Debug)]
struct StoreState {
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

/// File-backed history store with schema versioning and a hash-chained
/// integrity manifest.
///
/// Appends from all timelines share one hash chain, so they are serialized
/// on an internal lock for the duration of the disk write.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    config: StoreConfig,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(SegmentKind::Snapshot.dir()))?;
        std::fs::create_dir_all(root.join(SegmentKind::Entry.dir()))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join(META_FILE);
        let manifest_path = root.join("integrity").join(MANIFEST_FILE);

        let state = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            StoreState { meta, manifest }
        } else {
            let state = StoreState {
                meta: StoreMeta {
                    schema_version: SCHEMA_VERSION,
                    snapshot_count: 0,
                    entry_count: 0,
                },
                manifest: IntegrityManifest::default(),
            };
            atomic_write_json(&meta_path, &state.meta)?;
            atomic_write_json(&manifest_path, &state.manifest)?;
            state
        };

        tracing::debug!(
            root = %root.display(),
            snapshots = state.meta.snapshot_count,
            entries = state.meta.entry_count,
            "opened file store"
        );

        Ok(Self {
            root,
            config,
            state: Mutex::new(state),
        })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current counters.
    pub fn meta(&self) -> StoreMeta {
        self.state.lock().meta.clone()
    }

    /// Verify the manifest chain and the hash of every listed segment.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let state = self.state.lock();
        let mut prev_hash: Option<String> = None;
        for entry in &state.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }

            let kind = SegmentKind::of_filename(&entry.filename);
            let data = std::fs::read(self.segment_path(kind, &entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    fn segment_path(&self, kind: SegmentKind, filename: &str) -> PathBuf {
        self.root.join(kind.dir()).join(filename)
    }

    fn append_segment<T: Serialize>(&self, kind: SegmentKind, value: &T) -> Result<(), StoreError> {
        let cbor_bytes = cbor_serialize(value)?;
        let compressed = zstd_compress(&cbor_bytes, self.config.compression_level)?;
        let hash = sha256_hex(&compressed);

        let mut state = self.state.lock();
        let index = kind.count(&state.meta) + 1;
        let filename = kind.filename(index);
        std::fs::write(self.segment_path(kind, &filename), &compressed)?;

        let prev_hash = state.manifest.entries.last().map(|e| e.sha256.clone());
        state.manifest.entries.push(ManifestEntry {
            filename: filename.clone(),
            sha256: hash,
            prev_hash,
        });
        *kind.count_mut(&mut state.meta) = index;

        if let Err(err) = self.save_state(&state) {
            // Keep memory consistent with what is on disk.
            state.manifest.entries.pop();
            *kind.count_mut(&mut state.meta) = index - 1;
            return Err(err);
        }

        tracing::trace!(%filename, "segment appended");
        Ok(())
    }

    fn load_segments<T: DeserializeOwned>(&self, kind: SegmentKind) -> Result<Vec<T>, StoreError> {
        let state = self.state.lock();
        let hashes: HashMap<&str, &str> = state
            .manifest
            .entries
            .iter()
            .map(|e| (e.filename.as_str(), e.sha256.as_str()))
            .collect();

        let count = kind.count(&state.meta);
        let mut rows = Vec::with_capacity(count as usize);
        for index in 1..=count {
            let filename = kind.filename(index);
            let compressed = std::fs::read(self.segment_path(kind, &filename))?;

            let expected = hashes
                .get(filename.as_str())
                .ok_or_else(|| StoreError::Unlisted(filename.clone()))?;
            let actual = sha256_hex(&compressed);
            if *expected != actual {
                return Err(StoreError::IntegrityMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }

            let cbor_bytes = zstd_decompress(&compressed)?;
            rows.push(cbor_deserialize(&cbor_bytes)?);
        }
        Ok(rows)
    }

    fn save_state(&self, state: &StoreState) -> Result<(), StoreError> {
        atomic_write_json(&self.root.join(META_FILE), &state.meta)?;
        atomic_write_json(
            &self.root.join("integrity").join(MANIFEST_FILE),
            &state.manifest,
        )
    }
}

impl HistoryBackend for FileStore {
    fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.append_segment(SegmentKind::Snapshot, snapshot)
    }

    fn append_entry(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        self.append_segment(SegmentKind::Entry, entry)
    }

    fn load_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        self.load_segments(SegmentKind::Snapshot)
    }

    fn load_entries(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.load_segments(SegmentKind::Entry)
    }
}

/// Write JSON to a temporary sibling, sync it, then rename over `path`.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let file = std::fs::File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Content;
    use revlog_common::{ChangeType, EntityType, EntryId, Metadata};
    use serde_json::json;

    fn entry_for(snapshot: &Snapshot, version: u64) -> HistoryEntry {
        HistoryEntry {
            id: EntryId::new(),
            version,
            change_type: if version == 1 {
                ChangeType::Create
            } else {
                ChangeType::Update
            },
            entity_type: EntityType::File,
            entity_id: "main.py".into(),
            entity_name: "main.py".into(),
            timestamp: revlog_common::now(),
            author: "alice".into(),
            message: format!("v{version}"),
            snapshot_id: snapshot.id,
            previous_snapshot_id: None,
            tags: vec!["python".into()],
            metadata: Metadata::new(),
        }
    }

    fn open(path: &Path) -> FileStore {
        FileStore::open(path, StoreConfig::default()).unwrap()
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp.path().join("history"));
        assert_eq!(store.meta().snapshot_count, 0);
        assert_eq!(store.meta().entry_count, 0);
        assert!(store.root().join("snapshots").is_dir());
        assert!(store.root().join("entries").is_dir());
        assert!(store.root().join("integrity").is_dir());
        assert_eq!(store.meta().schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn rows_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");

        let mut metadata = Metadata::new();
        metadata.insert("origin".into(), json!({"kind": "upload", "size": 12}));
        let snap = Snapshot::create(&Content::json(&json!({"b": [1, 2], "a": null})), metadata)
            .unwrap();
        {
            let store = open(&path);
            store.put_snapshot(&snap).unwrap();
            store.append_entry(&entry_for(&snap, 1)).unwrap();
            store.append_entry(&entry_for(&snap, 2)).unwrap();
        }

        let store = open(&path);
        assert_eq!(store.meta().snapshot_count, 1);
        assert_eq!(store.meta().entry_count, 2);

        let snapshots = store.load_snapshots().unwrap();
        assert_eq!(snapshots, vec![snap.clone()]);
        assert!(snapshots[0].verify());

        let entries = store.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].version, 2);
        assert_eq!(entries[1].snapshot_id, snap.id);
        assert_eq!(entries[0].tags, vec!["python".to_string()]);
    }

    #[test]
    fn store_integrity_verification() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(&tmp.path().join("history"));
        let snap = Snapshot::create(&Content::text("print(1)"), Metadata::new()).unwrap();
        store.put_snapshot(&snap).unwrap();
        store.append_entry(&entry_for(&snap, 1)).unwrap();
        store.verify_integrity().unwrap();
    }

    #[test]
    fn store_integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let store = open(&path);
        let snap = Snapshot::create(&Content::text("print(1)"), Metadata::new()).unwrap();
        store.put_snapshot(&snap).unwrap();
        drop(store);

        let snap_path = path.join("snapshots").join("000001.snap.cbor.zst");
        let mut data = std::fs::read(&snap_path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&snap_path, &data).unwrap();

        let store = open(&path);
        assert!(store.verify_integrity().is_err());
        assert!(matches!(
            store.load_snapshots(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn broken_chain_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let store = open(&path);
        let snap = Snapshot::create(&Content::text("a"), Metadata::new()).unwrap();
        store.put_snapshot(&snap).unwrap();
        store.append_entry(&entry_for(&snap, 1)).unwrap();
        drop(store);

        let manifest_path = path.join("integrity").join(MANIFEST_FILE);
        let mut manifest: IntegrityManifest =
            serde_json::from_reader(std::fs::File::open(&manifest_path).unwrap()).unwrap();
        manifest.entries.swap(0, 1);
        serde_json::to_writer_pretty(std::fs::File::create(&manifest_path).unwrap(), &manifest)
            .unwrap();

        let store = open(&path);
        assert!(matches!(
            store.verify_integrity(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn unlisted_segment_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let store = open(&path);
        let snap = Snapshot::create(&Content::text("a"), Metadata::new()).unwrap();
        store.put_snapshot(&snap).unwrap();
        drop(store);

        let manifest_path = path.join("integrity").join(MANIFEST_FILE);
        serde_json::to_writer_pretty(
            std::fs::File::create(&manifest_path).unwrap(),
            &IntegrityManifest::default(),
        )
        .unwrap();

        let store = open(&path);
        assert!(matches!(
            store.load_snapshots(),
            Err(StoreError::Unlisted(name)) if name == "000001.snap.cbor.zst"
        ));
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history");
        let _store = open(&path);

        let meta_path = path.join(META_FILE);
        let mut meta: StoreMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match FileStore::open(&path, StoreConfig::default()) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn compression_level_is_configurable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(
            tmp.path().join("history"),
            StoreConfig {
                compression_level: 19,
            },
        )
        .unwrap();
        let snap = Snapshot::create(&Content::text("x".repeat(4096)), Metadata::new()).unwrap();
        store.put_snapshot(&snap).unwrap();
        assert_eq!(store.load_snapshots().unwrap()[0].content, snap.content);
    }
}
