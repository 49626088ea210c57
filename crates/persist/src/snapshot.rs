use std::sync::Arc;

use dashmap::DashMap;
use revlog_common::{ContentType, Metadata, SnapshotId, Timestamp, now};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of hex characters of the SHA-256 digest kept as the content hash.
pub const CONTENT_HASH_LEN: usize = 16;

/// Content that cannot be brought into canonical form.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("text content is not valid UTF-8: {0}")]
    InvalidText(#[from] std::str::Utf8Error),
    #[error("JSON content could not be parsed: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// An opaque payload tagged with its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub content_type: ContentType,
    pub bytes: Vec<u8>,
}

impl Content {
    pub fn new(content_type: ContentType, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            bytes: bytes.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(ContentType::Text, text.into().into_bytes())
    }

    pub fn json(value: &Value) -> Self {
        Self::new(ContentType::Json, value.to_string().into_bytes())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(ContentType::Binary, bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the payload as text. `None` for binary content or invalid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.content_type {
            ContentType::Binary => None,
            ContentType::Text | ContentType::Json => std::str::from_utf8(&self.bytes).ok(),
        }
    }

    /// Produce the canonical form of this content.
    ///
    /// JSON is re-serialized compactly with object keys sorted at every
    /// depth, so documents that differ only in key order or whitespace share
    /// one canonical form. Text must be UTF-8 and is kept byte-for-byte.
    pub fn canonicalize(&self) -> Result<Content, ContentError> {
        match self.content_type {
            ContentType::Text => {
                std::str::from_utf8(&self.bytes)?;
                Ok(self.clone())
            }
            ContentType::Json => {
                let value: Value = serde_json::from_slice(&self.bytes)?;
                let bytes = serde_json::to_vec(&sort_keys(value))?;
                Ok(Content::new(ContentType::Json, bytes))
            }
            ContentType::Binary => Ok(self.clone()),
        }
    }

    /// JSON view of the payload for exports: text as a string, JSON as the
    /// document itself, binary as a hex string.
    pub fn to_json_value(&self) -> Value {
        match self.content_type {
            ContentType::Text => Value::String(String::from_utf8_lossy(&self.bytes).into_owned()),
            ContentType::Json => serde_json::from_slice(&self.bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.bytes).into_owned())),
            ContentType::Binary => Value::String(hex::encode(&self.bytes)),
        }
    }
}

/// Rebuild every object with its keys in sorted order.
///
/// Does not rely on `serde_json::Map` iteration order, which changes when
/// the `preserve_order` feature is enabled anywhere in the build.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(fields.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Content hash of already-canonical content: SHA-256 over the type tag and
/// the canonical bytes, truncated to [`CONTENT_HASH_LEN`] hex characters.
pub fn content_hash(canonical: &Content) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.content_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(&canonical.bytes);
    let mut hash = format!("{:x}", hasher.finalize());
    hash.truncate(CONTENT_HASH_LEN);
    hash
}

/// An immutable, content-addressed copy of an entity's full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// Canonical form of the saved content.
    pub content: Content,
    pub content_hash: String,
    /// Length of the canonical form.
    pub size_bytes: u64,
    pub created_at: Timestamp,
    pub metadata: Metadata,
}

impl Snapshot {
    /// Canonicalize and hash `content` into a snapshot with a fresh id.
    ///
    /// Every call mints a new id, even for content identical to an earlier
    /// snapshot. The hash is recorded but never used to deduplicate.
    pub fn create(content: &Content, metadata: Metadata) -> Result<Self, ContentError> {
        Ok(Self::from_canonical(content.canonicalize()?, metadata))
    }

    /// Build a snapshot from content already returned by
    /// [`Content::canonicalize`].
    pub fn from_canonical(canonical: Content, metadata: Metadata) -> Self {
        let snapshot = Self {
            id: SnapshotId::new(),
            content_hash: content_hash(&canonical),
            size_bytes: canonical.len() as u64,
            content: canonical,
            created_at: now(),
            metadata,
        };
        tracing::debug!(
            id = %snapshot.id,
            hash = %snapshot.content_hash,
            size = snapshot.size_bytes,
            "snapshot created"
        );
        snapshot
    }

    /// Verify the snapshot by recomputing its canonical form and hash.
    pub fn verify(&self) -> bool {
        match self.content.canonicalize() {
            Ok(canonical) => {
                canonical == self.content
                    && self.size_bytes == canonical.len() as u64
                    && content_hash(&canonical) == self.content_hash
            }
            Err(_) => false,
        }
    }

    /// Metadata-only view, without the payload.
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id,
            content_type: self.content.content_type,
            content_hash: self.content_hash.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Snapshot fields without the payload, for listings and comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub content_type: ContentType,
    pub content_hash: String,
    pub size_bytes: u64,
    pub created_at: Timestamp,
    pub metadata: Metadata,
}

/// In-memory, concurrently readable snapshot blob store.
///
/// Snapshots are only ever inserted; nothing is mutated or removed.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: DashMap<SnapshotId, Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a snapshot from `content` and store it.
    pub fn create(
        &self,
        content: &Content,
        metadata: Metadata,
    ) -> Result<Arc<Snapshot>, ContentError> {
        Ok(self.insert(Snapshot::create(content, metadata)?))
    }

    /// Store an already-built snapshot (used when replaying a backend).
    pub fn insert(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(snapshot.id, Arc::clone(&snapshot));
        snapshot
    }

    /// Look up a snapshot by id.
    pub fn get(&self, id: &SnapshotId) -> Option<Arc<Snapshot>> {
        self.snapshots.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Number of snapshots stored.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_deterministic_across_key_order() {
        let a = Snapshot::create(
            &Content::new(ContentType::Json, br#"{"b": 1, "a": {"y": 2, "x": 3}}"#.to_vec()),
            Metadata::new(),
        )
        .unwrap();
        let b = Snapshot::create(&Content::json(&json!({"a": {"x": 3, "y": 2}, "b": 1})), Metadata::new())
            .unwrap();

        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content, b.content);
        assert_eq!(a.content.as_text(), Some(r#"{"a":{"x":3,"y":2},"b":1}"#));
        assert_eq!(a.content_hash.len(), CONTENT_HASH_LEN);
    }

    #[test]
    fn identical_content_still_gets_new_ids() {
        let store = SnapshotStore::new();
        let a = store.create(&Content::text("print(1)"), Metadata::new()).unwrap();
        let b = store.create(&Content::text("print(1)"), Metadata::new()).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn content_type_is_part_of_the_hash() {
        let text = Snapshot::create(&Content::text("1"), Metadata::new()).unwrap();
        let json = Snapshot::create(&Content::json(&json!(1)), Metadata::new()).unwrap();
        assert_eq!(text.content.bytes, json.content.bytes);
        assert_ne!(text.content_hash, json.content_hash);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = Snapshot::create(
            &Content::new(ContentType::Json, b"{not json".to_vec()),
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::InvalidJson(_)));
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let err = Snapshot::create(
            &Content::new(ContentType::Text, vec![0xff, 0xfe, 0x00]),
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::InvalidText(_)));
    }

    #[test]
    fn binary_content_is_opaque() {
        let snap = Snapshot::create(&Content::binary(vec![0xff, 0x00, 0x10]), Metadata::new())
            .unwrap();
        assert_eq!(snap.size_bytes, 3);
        assert!(snap.verify());
        assert_eq!(snap.content.to_json_value(), json!("ff0010"));
    }

    #[test]
    fn verify_detects_tampering() {
        let mut snap = Snapshot::create(&Content::text("hello"), Metadata::new()).unwrap();
        assert!(snap.verify());

        snap.content.bytes = b"hellp".to_vec();
        assert!(!snap.verify());
    }

    #[test]
    fn size_counts_canonical_bytes() {
        let snap = Snapshot::create(
            &Content::new(ContentType::Json, b"{ \"a\" : 1 }".to_vec()),
            Metadata::new(),
        )
        .unwrap();
        assert_eq!(snap.size_bytes, br#"{"a":1}"#.len() as u64);
    }

    #[test]
    fn store_get_unknown_is_none() {
        let store = SnapshotStore::new();
        assert!(store.is_empty());
        assert!(store.get(&SnapshotId::new()).is_none());
    }

    #[test]
    fn summary_omits_payload_but_keeps_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!("upload"));
        let snap = Snapshot::create(&Content::text("abc"), metadata).unwrap();
        let summary = snap.summary();
        assert_eq!(summary.id, snap.id);
        assert_eq!(summary.content_type, ContentType::Text);
        assert_eq!(summary.metadata["source"], json!("upload"));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn from_canonical_logs_creation_without_storing() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let canonical = Content::json(&json!({"b": 1, "a": 2})).canonicalize().unwrap();
        let snap = tracing::subscriber::with_default(subscriber, || {
            Snapshot::from_canonical(canonical.clone(), Metadata::new())
        });

        let output = String::from_utf8(log.0.lock().clone()).unwrap();
        assert!(output.contains("snapshot created"));
        assert!(output.contains(&snap.content_hash));
        assert_eq!(snap.content, canonical);
        assert_eq!(snap.content_hash, content_hash(&canonical));
        assert!(snap.verify());
    }
}
