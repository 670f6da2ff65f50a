//! Per-client record storage: an in-memory store and a JSON file store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{PrivateStore, Record, RecordId, RelayError};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<Record>,
    unavailable: bool,
}

/// An in-memory [`PrivateStore`].
///
/// Clones share the same records, so a test can keep a handle to inspect what a client
/// stored, or call [`set_available`](Self::set_available) to simulate a storage outage.
///
/// ```
/// use record_relay::{ClientId, MemoryPrivateStore, PrivateStore, Record, RecordId};
///
/// let mut store = MemoryPrivateStore::new();
/// let handle = store.clone();
/// store.put(Record::new(RecordId::from("r1"), ClientId::from("p1"), "Ana", 0)).unwrap();
/// assert_eq!(handle.list_owned().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryPrivateStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPrivateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`RelayError::StorageUnavailable`] while `false`.
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Number of stored records, regardless of availability.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    fn with<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Vec<Record>) -> T,
    ) -> Result<T, RelayError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(RelayError::storage(format!(
                "{operation}: private store unavailable"
            )));
        }
        Ok(f(&mut state.records))
    }
}

fn upsert(records: &mut Vec<Record>, record: Record) {
    match records.iter_mut().find(|existing| existing.id == record.id) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

impl PrivateStore for MemoryPrivateStore {
    fn get(&self, id: &RecordId) -> Result<Option<Record>, RelayError> {
        self.with("get", |records| {
            records.iter().find(|record| &record.id == id).cloned()
        })
    }

    fn put(&mut self, record: Record) -> Result<(), RelayError> {
        self.with("put", |records| upsert(records, record))
    }

    fn delete(&mut self, id: &RecordId) -> Result<(), RelayError> {
        self.with("delete", |records| records.retain(|record| &record.id != id))
    }

    fn list_owned(&self) -> Result<Vec<Record>, RelayError> {
        self.with("list_owned", |records| records.clone())
    }
}

/// A [`PrivateStore`] persisted as one pretty-printed JSON array on disk.
///
/// Every write rewrites the whole document. A missing file reads as an empty store; the
/// file is created on the first write. Concurrent writers to the same path are not
/// supported.
#[derive(Debug, Clone)]
pub struct FilePrivateStore {
    path: PathBuf,
}

impl FilePrivateStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Record>, RelayError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(RelayError::storage(format!(
                    "reading {}: {err}",
                    self.path.display()
                )))
            },
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|err| {
            RelayError::storage(format!("parsing {}: {err}", self.path.display()))
        })
    }

    fn store(&self, records: &[Record]) -> Result<(), RelayError> {
        let text = serde_json::to_string_pretty(records).map_err(|err| {
            RelayError::SerializationError {
                context: format!("encoding private store: {err}"),
            }
        })?;
        std::fs::write(&self.path, text).map_err(|err| {
            RelayError::storage(format!("writing {}: {err}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), records = records.len(), "private store written");
        Ok(())
    }
}

impl PrivateStore for FilePrivateStore {
    fn get(&self, id: &RecordId) -> Result<Option<Record>, RelayError> {
        Ok(self.load()?.into_iter().find(|record| &record.id == id))
    }

    fn put(&mut self, record: Record) -> Result<(), RelayError> {
        let mut records = self.load()?;
        upsert(&mut records, record);
        self.store(&records)
    }

    fn delete(&mut self, id: &RecordId) -> Result<(), RelayError> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| &record.id != id);
        if records.len() == before {
            return Ok(());
        }
        self.store(&records)
    }

    fn list_owned(&self) -> Result<Vec<Record>, RelayError> {
        self.load()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::ClientId;

    fn record(id: &str, name: &str) -> Record {
        let mut record = Record::new(RecordId::from(id), ClientId::from("p1"), "Ana", 10);
        record.fields.insert("name".into(), name.into());
        record
    }

    fn names(store: &impl PrivateStore) -> Vec<String> {
        store
            .list_owned()
            .unwrap()
            .iter()
            .map(|record| record.display_name().to_owned())
            .collect()
    }

    fn exercise(store: &mut impl PrivateStore) {
        assert!(store.list_owned().unwrap().is_empty());
        store.put(record("a", "First")).unwrap();
        store.put(record("b", "Second")).unwrap();
        store.put(record("a", "First again")).unwrap();
        assert_eq!(names(store), vec!["First again", "Second"]);

        let fetched = store.get(&RecordId::from("b")).unwrap().unwrap();
        assert_eq!(fetched.display_name(), "Second");
        assert!(store.get(&RecordId::from("zzz")).unwrap().is_none());

        store.delete(&RecordId::from("a")).unwrap();
        store.delete(&RecordId::from("missing")).unwrap();
        assert_eq!(names(store), vec!["Second"]);
    }

    #[test]
    fn memory_store_keeps_insertion_order() {
        exercise(&mut MemoryPrivateStore::new());
    }

    #[test]
    fn file_store_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&mut FilePrivateStore::new(dir.path().join("records.json")));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        FilePrivateStore::new(&path)
            .put(record("a", "Kaya"))
            .unwrap();
        let reopened = FilePrivateStore::new(&path);
        assert_eq!(names(&reopened), vec!["Kaya"]);
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FilePrivateStore::new(&path);
        assert!(matches!(
            store.list_owned(),
            Err(RelayError::StorageUnavailable { .. })
        ));
    }

    #[test]
    fn unavailable_memory_store_fails_every_operation() {
        let mut store = MemoryPrivateStore::new();
        store.put(record("a", "Kaya")).unwrap();
        store.set_available(false);
        assert!(store.get(&RecordId::from("a")).is_err());
        assert!(store.put(record("b", "Other")).is_err());
        assert!(store.delete(&RecordId::from("a")).is_err());
        assert!(store.list_owned().is_err());
        assert_eq!(store.len(), 1);

        store.set_available(true);
        assert_eq!(names(&store), vec!["Kaya"]);
    }
}
