//! Append-only record stores.
//!
//! The ledger and the crystal store depend only on [`AppendStore`]. Two
//! backends ship here: [`MemoryStore`] and [`JsonlStore`], a JSON-lines file
//! where every line carries a SHA-256 digest of its record.
//!
//! The digest covers the exact record text as written, so verification never
//! depends on re-serializing a parsed value.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Error types for store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored line failed to parse or its digest does not match
    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// A record with this id is already stored
    #[error("Conflict: record '{0}' already exists")]
    Conflict(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Something an [`AppendStore`] can hold.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record_id(&self) -> &str;
}

/// Durable, ordered, append-only storage.
#[async_trait]
pub trait AppendStore<T: Record>: Send + Sync {
    /// Store a record. Returns only once the record is durable.
    async fn append(&self, record: T) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// All records in append order.
    async fn list(&self) -> Result<Vec<T>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Ordered records plus an id index.
struct Records<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Record> Records<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    fn push(&mut self, record: T) {
        self.index.insert(record.record_id().to_string(), self.items.len());
        self.items.push(record);
    }

    fn get(&self, id: &str) -> Option<T> {
        self.index.get(id).and_then(|i| self.items.get(*i)).cloned()
    }
}

/// In-memory store.
pub struct MemoryStore<T> {
    records: RwLock<Records<T>>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::new()),
        }
    }
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> AppendStore<T> for MemoryStore<T> {
    async fn append(&self, record: T) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains(record.record_id()) {
            return Err(StoreError::Conflict(record.record_id().to_string()));
        }
        records.push(record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().await.get(id))
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().await.items.clone())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.items.len())
    }
}

/// One stored line. `record` is kept verbatim.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    digest: String,
    record: Box<RawValue>,
}

/// SHA-256 of content, hex encoded.
pub fn compute_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

async fn write_synced(file: &mut tokio::fs::File, bytes: &[u8]) -> Result<(), StoreError> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

/// JSON-lines file store.
///
/// The file is replayed into memory on open; appends go to the file first
/// and become visible to readers only once synced. A failed append truncates
/// the file back to its last committed length, and an unterminated final line
/// left by a crash is dropped on the next open.
pub struct JsonlStore<T> {
    path: PathBuf,
    records: RwLock<Records<T>>,
    file: Mutex<tokio::fs::File>,
}

impl<T: Record> JsonlStore<T> {
    /// Open or create the store at `path`, verifying every stored line.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut records = Records::new();
        let mut truncate_to = None;
        let mut terminate_tail = false;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let (complete, tail) = match contents.rfind('\n') {
                    Some(i) => contents.split_at(i + 1),
                    None => ("", contents.as_str()),
                };

                let mut line_no = 0;
                for line in complete.lines() {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    Self::replay(&mut records, line_no, Self::decode_line(line_no, line)?)?;
                }

                if !tail.trim().is_empty() {
                    line_no += 1;
                    match Self::decode_line(line_no, tail) {
                        Ok(record) => {
                            Self::replay(&mut records, line_no, record)?;
                            terminate_tail = true;
                        }
                        Err(e) => {
                            warn!(
                                path = %path.display(),
                                line = line_no,
                                bytes = tail.len(),
                                error = %e,
                                "Dropping unterminated final line"
                            );
                            truncate_to = Some(complete.len() as u64);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if let Some(len) = truncate_to {
            file.set_len(len).await?;
            file.sync_data().await?;
        }
        if terminate_tail {
            write_synced(&mut file, b"\n").await?;
        }

        info!(path = %path.display(), records = records.items.len(), "Opened record store");

        Ok(Self {
            path,
            records: RwLock::new(records),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(records: &mut Records<T>, line_no: usize, record: T) -> Result<(), StoreError> {
        if records.contains(record.record_id()) {
            return Err(StoreError::Corrupt {
                line: line_no,
                reason: format!("duplicate id '{}'", record.record_id()),
            });
        }
        records.push(record);
        Ok(())
    }

    fn decode_line(line_no: usize, line: &str) -> Result<T, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            line: line_no,
            reason,
        };

        let envelope: Envelope = serde_json::from_str(line).map_err(|e| corrupt(e.to_string()))?;
        let body = envelope.record.get();
        if compute_digest(body.as_bytes()) != envelope.digest {
            return Err(corrupt("digest mismatch".to_string()));
        }
        serde_json::from_str(body).map_err(|e| corrupt(e.to_string()))
    }

    fn encode_line(record: &T) -> Result<String, StoreError> {
        let body = serde_json::to_string(record)?;
        let envelope = Envelope {
            digest: compute_digest(body.as_bytes()),
            record: RawValue::from_string(body)?,
        };
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        Ok(line)
    }
}

#[async_trait]
impl<T: Record> AppendStore<T> for JsonlStore<T> {
    async fn append(&self, record: T) -> Result<(), StoreError> {
        // The file lock serializes writers; readers only wait on the brief
        // index update at the end.
        let mut file = self.file.lock().await;

        if self.records.read().await.contains(record.record_id()) {
            return Err(StoreError::Conflict(record.record_id().to_string()));
        }

        let line = Self::encode_line(&record)?;
        let committed_len = file.metadata().await?.len();
        if let Err(e) = write_synced(&mut file, line.as_bytes()).await {
            warn!(record_id = %record.record_id(), path = %self.path.display(), error = %e, "Append failed, rolling back");
            if let Err(rollback) = file.set_len(committed_len).await {
                error!(path = %self.path.display(), error = %rollback, "Failed to truncate partial append");
            }
            return Err(e);
        }

        debug!(record_id = %record.record_id(), path = %self.path.display(), "Record appended");
        self.records.write().await.push(record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.records.read().await.get(id))
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.records.read().await.items.clone())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        weight: f64,
    }

    impl Record for Note {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str) -> Note {
        Note {
            id: id.to_string(),
            body: format!("body of {}", id),
            weight: 0.1 + 0.2,
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.append(note("a")).await.unwrap();
        store.append(note("b")).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.get("b").await.unwrap(), Some(note("b")));
        assert_eq!(store.get("c").await.unwrap(), None);
        assert_eq!(
            store.append(note("a")).await,
            Err(StoreError::Conflict("a".to_string()))
        );

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_jsonl_store_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.jsonl");

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            store.append(note("a")).await.unwrap();
            store.append(note("b")).await.unwrap();
            assert!(store.append(note("a")).await.is_err());
        }

        let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.list().await.unwrap(), vec![note("a"), note("b")]);

        store.append(note("c")).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_jsonl_store_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            store.append(note("a")).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, contents.replace("body of a", "body of z"))
            .await
            .unwrap();

        let result = JsonlStore::<Note>::open(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt { line: 1, .. })));
    }

    #[tokio::test]
    async fn test_jsonl_store_rejects_broken_complete_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");
        tokio::fs::write(&path, "{\"digest\":\"ab\n").await.unwrap();

        let result = JsonlStore::<Note>::open(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt { line: 1, .. })));
    }

    #[tokio::test]
    async fn test_jsonl_store_drops_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            store.append(note("a")).await.unwrap();
            store.append(note("b")).await.unwrap();
        }
        let intact = tokio::fs::read_to_string(&path).await.unwrap();
        let torn = JsonlStore::<Note>::encode_line(&note("c")).unwrap();
        tokio::fs::write(&path, format!("{}{}", intact, &torn[..torn.len() / 2]))
            .await
            .unwrap();

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            assert_eq!(store.list().await.unwrap(), vec![note("a"), note("b")]);
            assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), intact);
            store.append(note("c")).await.unwrap();
        }

        let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![note("a"), note("b"), note("c")]);
    }

    #[tokio::test]
    async fn test_jsonl_store_terminates_valid_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");
        let line = JsonlStore::<Note>::encode_line(&note("a")).unwrap();
        tokio::fs::write(&path, line.trim_end()).await.unwrap();

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            assert_eq!(store.list().await.unwrap(), vec![note("a")]);
            store.append(note("b")).await.unwrap();
        }

        let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![note("a"), note("b")]);
    }

    /// splitmix64
    fn next_random(state: &mut u64) -> u64 {
        *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[tokio::test]
    async fn test_jsonl_store_reopens_arbitrary_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jsonl");
        let mut state = 0x5eed;

        let mut notes: Vec<Note> = (0..500)
            .map(|i| Note {
                id: format!("n{}", i),
                body: "confidence".to_string(),
                weight: (next_random(&mut state) >> 11) as f64 / (1u64 << 53) as f64,
            })
            .collect();
        for (i, weight) in [f64::MIN_POSITIVE, 1.0 - f64::EPSILON, 5e-324, 0.1 + 0.2, 1.0 / 3.0]
            .into_iter()
            .enumerate()
        {
            notes.push(Note {
                id: format!("edge{}", i),
                body: "edge".to_string(),
                weight,
            });
        }

        {
            let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
            for n in &notes {
                store.append(n.clone()).await.unwrap();
            }
        }

        let store: JsonlStore<Note> = JsonlStore::open(&path).await.unwrap();
        let reopened = store.list().await.unwrap();
        assert_eq!(reopened.len(), notes.len());
        for (stored, original) in reopened.iter().zip(&notes) {
            assert_eq!(stored.weight.to_bits(), original.weight.to_bits(), "{}", original.id);
        }
    }

    #[test]
    fn test_compute_digest() {
        assert_eq!(
            compute_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
