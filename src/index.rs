//! The shared index: non-sensitive record metadata visible to every client.
//!
//! The whole index is one JSON object under the key `"{namespace}:index"`, mapping record ids
//! to entries:
//!
//! ```json
//! { "2f6c…": { "recordId": "2f6c…", "displayName": "Kaya", "ownerId": "p1", "ownerDisplayName": "Ana" } }
//! ```
//!
//! Entries never carry record fields. Reads are lenient, since any client in the room can
//! write the blob: entries without an owner are skipped, missing names get defaults, and
//! anything odd is reported to the violation observer.
//!
//! # Write modes
//!
//! With [`IndexWriteMode::WholeBlob`] every upsert reads the whole object, merges one entry
//! and writes the whole object back. Two clients doing this concurrently for different
//! records can lose one of the updates; the next save of the lost record repairs it.
//! [`IndexWriteMode::Atomic`] performs the merge inside [`SharedStore::update`] instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::record::UNTITLED;
use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{ClientId, Record, RecordId, RelayError, SharedStore};

const RECORD_ID: &str = "recordId";
const DISPLAY_NAME: &str = "displayName";
const OWNER_ID: &str = "ownerId";
const OWNER_DISPLAY_NAME: &str = "ownerDisplayName";
const FIELDS: &str = "fields";

/// One record's public metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// The record this entry describes.
    pub record_id: RecordId,
    /// The record's display name.
    pub display_name: String,
    /// The record's owner; requests for the record are addressed to it.
    pub owner_id: ClientId,
    /// The owner's display name.
    pub owner_display_name: String,
}

/// A partial entry, merged key by key into whatever is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPatch {
    /// New display name, if it changed.
    pub display_name: Option<String>,
    /// New owner.
    pub owner_id: Option<ClientId>,
    /// New owner display name.
    pub owner_display_name: Option<String>,
}

impl IndexPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Sets the owner and the owner's display name.
    #[must_use]
    pub fn with_owner(mut self, owner_id: ClientId, owner_display_name: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id);
        self.owner_display_name = Some(owner_display_name.into());
        self
    }

    /// The patch an owner writes for one of its records: name and owner identity, never
    /// fields.
    #[must_use]
    pub fn for_record(record: &Record) -> Self {
        Self::new()
            .with_display_name(record.display_name())
            .with_owner(record.owner_id.clone(), record.owner_display_name.clone())
    }

    /// Merges the patch into `existing`, returning the new raw entry and whether a `fields`
    /// key had to be stripped.
    fn apply(&self, record_id: &RecordId, existing: Option<Value>) -> (Value, bool) {
        let mut entry = match existing {
            Some(Value::Object(entry)) => entry,
            _ => Map::new(),
        };
        let stripped = entry.remove(FIELDS).is_some();
        entry.insert(RECORD_ID.into(), Value::String(record_id.to_string()));
        if let Some(name) = &self.display_name {
            entry.insert(DISPLAY_NAME.into(), Value::String(name.clone()));
        }
        if let Some(owner) = &self.owner_id {
            entry.insert(OWNER_ID.into(), Value::String(owner.to_string()));
        }
        if let Some(owner_name) = &self.owner_display_name {
            entry.insert(OWNER_DISPLAY_NAME.into(), Value::String(owner_name.clone()));
        }
        (Value::Object(entry), stripped)
    }
}

/// How [`SharedIndex`] writes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexWriteMode {
    /// Read the whole index, merge, write the whole index. Concurrent writers may lose
    /// updates.
    #[default]
    WholeBlob,
    /// Merge inside [`SharedStore::update`]. Requires a store reporting
    /// [`SharedStore::supports_atomic_update`].
    Atomic,
}

/// Why a raw entry could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryDefect {
    NotAnObject,
    MissingOwner,
}

impl EntryDefect {
    const fn describe(self) -> &'static str {
        match self {
            Self::NotAnObject => "entry is not an object",
            Self::MissingOwner => "entry has no ownerId",
        }
    }
}

fn non_empty_str<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn parse_entry(record_id: &str, raw: &Value) -> Result<IndexEntry, EntryDefect> {
    let entry = raw.as_object().ok_or(EntryDefect::NotAnObject)?;
    let owner_id = non_empty_str(entry, OWNER_ID).ok_or(EntryDefect::MissingOwner)?;
    Ok(IndexEntry {
        record_id: RecordId::from(record_id),
        display_name: non_empty_str(entry, DISPLAY_NAME)
            .unwrap_or(UNTITLED)
            .to_owned(),
        owner_id: ClientId::from(owner_id),
        owner_display_name: non_empty_str(entry, OWNER_DISPLAY_NAME)
            .unwrap_or(owner_id)
            .to_owned(),
    })
}

/// A copy of the raw index taken by [`SharedIndex::snapshot`], edited locally and written
/// back by [`SharedIndex::commit`].
///
/// Holding a snapshot across another client's commit reproduces the lost-update race of
/// [`IndexWriteMode::WholeBlob`]:
///
/// ```
/// use record_relay::{ClientId, IndexPatch, MemorySharedStore, RecordId, SharedIndex};
///
/// let store = MemorySharedStore::new();
/// let alice = SharedIndex::new(store.clone(), "demo");
/// let bob = SharedIndex::new(store.clone(), "demo");
///
/// let mut a = alice.snapshot().unwrap();
/// let mut b = bob.snapshot().unwrap();
/// a.upsert(&RecordId::from("r1"), &IndexPatch::new().with_owner(ClientId::from("p1"), "Ana"));
/// b.upsert(&RecordId::from("r2"), &IndexPatch::new().with_owner(ClientId::from("p2"), "Ben"));
/// alice.commit(a).unwrap();
/// bob.commit(b).unwrap();
///
/// let entries = alice.read_all().unwrap();
/// assert!(!entries.contains_key(&RecordId::from("r1")));
/// assert!(entries.contains_key(&RecordId::from("r2")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    raw: Map<String, Value>,
    dirty: bool,
    stripped: Vec<RecordId>,
}

impl IndexSnapshot {
    fn new(raw: Map<String, Value>) -> Self {
        Self {
            raw,
            dirty: false,
            stripped: Vec::new(),
        }
    }

    /// Merges `patch` into the entry for `record_id`, creating it if needed.
    pub fn upsert(&mut self, record_id: &RecordId, patch: &IndexPatch) {
        let existing = self.raw.remove(record_id.as_str());
        let (entry, stripped) = patch.apply(record_id, existing);
        if stripped {
            self.stripped.push(record_id.clone());
        }
        self.raw.insert(record_id.to_string(), entry);
        self.dirty = true;
    }

    /// Removes the entry for `record_id`. Returns `false` if there was none.
    pub fn remove(&mut self, record_id: &RecordId) -> bool {
        let removed = self.raw.remove(record_id.as_str()).is_some();
        self.dirty |= removed;
        removed
    }

    /// Returns `true` if the snapshot holds an entry for `record_id`, readable or not.
    #[must_use]
    pub fn contains(&self, record_id: &RecordId) -> bool {
        self.raw.contains_key(record_id.as_str())
    }

    /// Number of raw entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the snapshot holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The readable entries of the snapshot.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<RecordId, IndexEntry> {
        self.raw
            .iter()
            .filter_map(|(id, raw)| parse_entry(id, raw).ok())
            .map(|entry| (entry.record_id.clone(), entry))
            .collect()
    }
}

/// Typed access to the index blob in a [`SharedStore`].
pub struct SharedIndex {
    store: Box<dyn SharedStore>,
    key: String,
    mode: IndexWriteMode,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for SharedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedIndex")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl SharedIndex {
    /// The store key of the index for `namespace`.
    #[must_use]
    pub fn key_for(namespace: &str) -> String {
        format!("{namespace}:index")
    }

    /// Creates a whole-blob index over `store`.
    pub fn new(store: impl SharedStore + 'static, namespace: &str) -> Self {
        Self {
            store: Box::new(store),
            key: Self::key_for(namespace),
            mode: IndexWriteMode::WholeBlob,
            observer: None,
        }
    }

    /// Creates an index with the given write mode.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for [`IndexWriteMode::Atomic`] over a store
    /// without atomic updates.
    pub fn with_write_mode(
        store: Box<dyn SharedStore>,
        namespace: &str,
        mode: IndexWriteMode,
    ) -> Result<Self, RelayError> {
        if mode == IndexWriteMode::Atomic && !store.supports_atomic_update() {
            return Err(RelayError::InvalidRequest {
                info: "atomic index writes need a shared store with atomic update support"
                    .to_owned(),
            });
        }
        Ok(Self {
            store,
            key: Self::key_for(namespace),
            mode,
            observer: None,
        })
    }

    pub(crate) fn set_observer(&mut self, observer: Option<Arc<dyn ViolationObserver>>) {
        self.observer = observer;
    }

    /// The store key holding the index.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The write mode in use.
    #[must_use]
    pub fn mode(&self) -> IndexWriteMode {
        self.mode
    }

    /// The underlying store's change counter, if it keeps one.
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.store.revision()
    }

    fn read_raw(&self) -> Result<Map<String, Value>, RelayError> {
        match self.store.read(&self.key)? {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(raw)) => Ok(raw),
            Some(other) => {
                report_violation!(
                    &self.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::SharedIndex,
                    None,
                    "index under {} is a {} instead of an object; treating it as empty",
                    self.key,
                    json_type(&other)
                );
                Ok(Map::new())
            },
        }
    }

    /// Reads every readable entry. Each call is a fresh read.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be read.
    pub fn read_all(&self) -> Result<BTreeMap<RecordId, IndexEntry>, RelayError> {
        let raw = self.read_raw()?;
        let mut entries = BTreeMap::new();
        for (id, value) in &raw {
            match parse_entry(id, value) {
                Ok(entry) => {
                    if value.get(FIELDS).is_some() {
                        report_violation!(
                            &self.observer,
                            ViolationSeverity::Warning,
                            ViolationKind::SharedIndex,
                            Some(entry.record_id.clone()),
                            "index entry carries record fields; ignoring them"
                        );
                    }
                    entries.insert(entry.record_id.clone(), entry);
                },
                Err(defect) => {
                    report_violation!(
                        &self.observer,
                        ViolationSeverity::Warning,
                        ViolationKind::SharedIndex,
                        Some(RecordId::from(id.as_str())),
                        "skipping index entry: {}",
                        defect.describe()
                    );
                },
            }
        }
        trace!(entries = entries.len(), key = %self.key, "index read");
        Ok(entries)
    }

    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be read.
    pub fn get(&self, record_id: &RecordId) -> Result<Option<IndexEntry>, RelayError> {
        Ok(self.read_all()?.remove(record_id))
    }

    /// Takes a copy of the raw index for a read-modify-write cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be read.
    pub fn snapshot(&self) -> Result<IndexSnapshot, RelayError> {
        Ok(IndexSnapshot::new(self.read_raw()?))
    }

    /// Writes a snapshot back as the whole index. A snapshot without changes is not written.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be written.
    pub fn commit(&self, snapshot: IndexSnapshot) -> Result<(), RelayError> {
        if !snapshot.dirty {
            return Ok(());
        }
        for record_id in &snapshot.stripped {
            self.report_stripped(record_id);
        }
        self.store.write(&self.key, Value::Object(snapshot.raw))?;
        debug!(key = %self.key, "index committed");
        Ok(())
    }

    /// Merges `patch` into the entry for `record_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be read or written.
    pub fn upsert(&self, record_id: &RecordId, patch: &IndexPatch) -> Result<(), RelayError> {
        match self.mode {
            IndexWriteMode::WholeBlob => {
                let mut snapshot = self.snapshot()?;
                snapshot.upsert(record_id, patch);
                self.commit(snapshot)
            },
            IndexWriteMode::Atomic => {
                let mut stripped = false;
                let mut malformed = false;
                self.store.update(&self.key, &mut |current| {
                    let mut raw = match current {
                        Some(Value::Object(raw)) => raw,
                        None | Some(Value::Null) => Map::new(),
                        Some(_) => {
                            malformed = true;
                            Map::new()
                        },
                    };
                    let existing = raw.remove(record_id.as_str());
                    let (entry, had_fields) = patch.apply(record_id, existing);
                    stripped = had_fields;
                    raw.insert(record_id.to_string(), entry);
                    Value::Object(raw)
                })?;
                if malformed {
                    report_violation!(
                        &self.observer,
                        ViolationSeverity::Warning,
                        ViolationKind::SharedIndex,
                        Some(record_id.clone()),
                        "replaced non-object index under {}",
                        self.key
                    );
                }
                if stripped {
                    self.report_stripped(record_id);
                }
                debug!(key = %self.key, record = %record_id, "index entry merged atomically");
                Ok(())
            },
        }
    }

    /// Removes the entry for `record_id`. Returns `false` (and writes nothing) if there was
    /// none.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the store cannot be read or written.
    pub fn remove(&self, record_id: &RecordId) -> Result<bool, RelayError> {
        let mut snapshot = self.snapshot()?;
        if !snapshot.contains(record_id) {
            return Ok(false);
        }
        match self.mode {
            IndexWriteMode::WholeBlob => {
                snapshot.remove(record_id);
                self.commit(snapshot)?;
            },
            IndexWriteMode::Atomic => {
                self.store.update(&self.key, &mut |current| match current {
                    Some(Value::Object(mut raw)) => {
                        raw.remove(record_id.as_str());
                        Value::Object(raw)
                    },
                    _ => Value::Object(Map::new()),
                })?;
            },
        }
        debug!(key = %self.key, record = %record_id, "index entry removed");
        Ok(true)
    }

    fn report_stripped(&self, record_id: &RecordId) {
        report_violation!(
            &self.observer,
            ViolationSeverity::Warning,
            ViolationKind::SharedIndex,
            Some(record_id.clone()),
            "stripped record fields from index entry"
        );
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
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
    use crate::telemetry::CollectingObserver;
    use crate::MemorySharedStore;
    use serde_json::json;

    fn observed(
        store: MemorySharedStore,
        mode: IndexWriteMode,
    ) -> (SharedIndex, Arc<CollectingObserver>) {
        let collector = Arc::new(CollectingObserver::new());
        let mut index = SharedIndex::with_write_mode(Box::new(store), "ns", mode).unwrap();
        index.set_observer(Some(collector.clone()));
        (index, collector)
    }

    fn owner_patch(owner: &str, name: &str) -> IndexPatch {
        IndexPatch::new()
            .with_display_name(name)
            .with_owner(ClientId::from(owner), format!("{owner} name"))
    }

    #[test]
    fn upsert_creates_then_merges() {
        for mode in [IndexWriteMode::WholeBlob, IndexWriteMode::Atomic] {
            let store = MemorySharedStore::new();
            let (index, collector) = observed(store.clone(), mode);
            let r1 = RecordId::from("r1");

            index.upsert(&r1, &owner_patch("p1", "Kaya")).unwrap();
            index
                .upsert(&r1, &IndexPatch::new().with_display_name("Kaya II"))
                .unwrap();

            let entry = index.get(&r1).unwrap().unwrap();
            assert_eq!(entry.display_name, "Kaya II");
            assert_eq!(entry.owner_id, ClientId::from("p1"));
            assert_eq!(entry.owner_display_name, "p1 name");

            let raw = store.read("ns:index").unwrap().unwrap();
            assert_eq!(raw["r1"]["recordId"], "r1");
            assert!(raw["r1"].get("fields").is_none());
            crate::assert_no_violations!(collector);
        }
    }

    #[test]
    fn reads_apply_defaults_and_skip_ownerless_entries() {
        let store = MemorySharedStore::new();
        store
            .write(
                "ns:index",
                json!({
                    "a": {"ownerId": "p1"},
                    "b": {"displayName": "Orphan"},
                    "c": "garbage",
                    "d": {"ownerId": "p2", "displayName": "Full", "ownerDisplayName": "Ben"}
                }),
            )
            .unwrap();
        let (index, collector) = observed(store, IndexWriteMode::WholeBlob);

        let entries = index.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        let a = &entries[&RecordId::from("a")];
        assert_eq!(a.display_name, UNTITLED);
        assert_eq!(a.owner_display_name, "p1");
        assert_eq!(entries[&RecordId::from("d")].owner_display_name, "Ben");
        assert_eq!(collector.violations_of_kind(ViolationKind::SharedIndex).len(), 2);
    }

    #[test]
    fn foreign_fields_are_stripped_on_write() {
        let store = MemorySharedStore::new();
        store
            .write(
                "ns:index",
                json!({"r1": {"ownerId": "p1", "fields": {"hp": "10"}}}),
            )
            .unwrap();
        let (index, collector) = observed(store.clone(), IndexWriteMode::WholeBlob);

        assert_eq!(index.read_all().unwrap().len(), 1);
        assert_eq!(collector.len(), 1);

        index
            .upsert(&RecordId::from("r1"), &IndexPatch::new().with_display_name("Kaya"))
            .unwrap();
        let raw = store.read("ns:index").unwrap().unwrap();
        assert!(raw["r1"].get("fields").is_none());
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn non_object_index_reads_as_empty() {
        let store = MemorySharedStore::new();
        store.write("ns:index", json!([1, 2, 3])).unwrap();
        let (index, collector) = observed(store, IndexWriteMode::WholeBlob);
        assert!(index.read_all().unwrap().is_empty());
        assert!(collector.has_violation(ViolationKind::SharedIndex));
    }

    #[test]
    fn remove_absent_entry_does_not_write() {
        let store = MemorySharedStore::new();
        let index = SharedIndex::new(store.clone(), "ns");
        assert!(!index.remove(&RecordId::from("nope")).unwrap());
        assert_eq!(store.revision(), Some(0));

        index
            .upsert(&RecordId::from("r1"), &owner_patch("p1", "Kaya"))
            .unwrap();
        assert!(index.remove(&RecordId::from("r1")).unwrap());
        assert!(index.read_all().unwrap().is_empty());
    }

    #[test]
    fn atomic_mode_needs_store_support() {
        let result = SharedIndex::with_write_mode(
            Box::new(MemorySharedStore::without_atomic_update()),
            "ns",
            IndexWriteMode::Atomic,
        );
        assert!(matches!(result, Err(RelayError::InvalidRequest { .. })));
    }

    #[test]
    fn unchanged_snapshot_is_not_committed() {
        let store = MemorySharedStore::new();
        let index = SharedIndex::new(store.clone(), "ns");
        let snapshot = index.snapshot().unwrap();
        index.commit(snapshot).unwrap();
        assert_eq!(store.revision(), Some(0));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let store = MemorySharedStore::new();
        let a = SharedIndex::new(store.clone(), "a");
        let b = SharedIndex::new(store, "b");
        a.upsert(&RecordId::from("r1"), &owner_patch("p1", "Kaya"))
            .unwrap();
        assert!(b.read_all().unwrap().is_empty());
        assert_eq!(a.key(), "a:index");
    }
}
