//! In-memory room metadata shared by every client of a process.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::{RelayError, SharedStore};

#[derive(Debug, Default)]
struct RoomMetadata {
    values: BTreeMap<String, Value>,
    revision: u64,
    unavailable: bool,
}

/// A [`SharedStore`] living in memory. Clones are handles onto the same room.
///
/// Every write bumps [`revision`](SharedStore::revision), which clients poll as their change
/// notification. [`update`](SharedStore::update) runs under the room lock and is atomic
/// unless the store was created with [`without_atomic_update`](Self::without_atomic_update).
#[derive(Debug, Clone)]
pub struct MemorySharedStore {
    room: Arc<Mutex<RoomMetadata>>,
    atomic: bool,
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySharedStore {
    /// Creates an empty room.
    #[must_use]
    pub fn new() -> Self {
        Self {
            room: Arc::new(Mutex::new(RoomMetadata::default())),
            atomic: true,
        }
    }

    /// Creates an empty room whose `update` is a plain read followed by a write, like most
    /// hosted metadata services.
    #[must_use]
    pub fn without_atomic_update() -> Self {
        Self {
            atomic: false,
            ..Self::new()
        }
    }

    /// Makes every operation fail with [`RelayError::StorageUnavailable`] while `false`.
    pub fn set_available(&self, available: bool) {
        self.room.lock().unavailable = !available;
    }

    fn check(room: &RoomMetadata, operation: &str) -> Result<(), RelayError> {
        if room.unavailable {
            Err(RelayError::storage(format!(
                "{operation}: shared store unavailable"
            )))
        } else {
            Ok(())
        }
    }
}

impl SharedStore for MemorySharedStore {
    fn read(&self, key: &str) -> Result<Option<Value>, RelayError> {
        let room = self.room.lock();
        Self::check(&room, "read")?;
        Ok(room.values.get(key).cloned())
    }

    fn write(&self, key: &str, value: Value) -> Result<(), RelayError> {
        let mut room = self.room.lock();
        Self::check(&room, "write")?;
        room.values.insert(key.to_owned(), value);
        room.revision += 1;
        Ok(())
    }

    fn supports_atomic_update(&self) -> bool {
        self.atomic
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<(), RelayError> {
        if !self.atomic {
            let current = self.read(key)?;
            return self.write(key, apply(current));
        }
        let mut room = self.room.lock();
        Self::check(&room, "update")?;
        let next = apply(room.values.get(key).cloned());
        room.values.insert(key.to_owned(), next);
        room.revision += 1;
        Ok(())
    }

    fn revision(&self) -> Option<u64> {
        Some(self.room.lock().revision)
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
    use serde_json::json;

    #[test]
    fn clones_share_values_and_revision() {
        let store = MemorySharedStore::new();
        let other = store.clone();
        assert_eq!(store.revision(), Some(0));

        store.write("k", json!({"a": 1})).unwrap();
        assert_eq!(other.read("k").unwrap(), Some(json!({"a": 1})));
        assert_eq!(other.revision(), Some(1));
        assert_eq!(other.read("missing").unwrap(), None);
    }

    #[test]
    fn update_applies_to_current_value() {
        let store = MemorySharedStore::new();
        store.write("n", json!(1)).unwrap();
        store
            .update("n", &mut |current| {
                json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)
            })
            .unwrap();
        assert_eq!(store.read("n").unwrap(), Some(json!(2)));
        assert_eq!(store.revision(), Some(2));
    }

    #[test]
    fn atomic_capability_is_reported() {
        assert!(MemorySharedStore::new().supports_atomic_update());
        let plain = MemorySharedStore::without_atomic_update();
        assert!(!plain.supports_atomic_update());
        plain.update("k", &mut |_| json!("v")).unwrap();
        assert_eq!(plain.read("k").unwrap(), Some(json!("v")));
    }

    #[test]
    fn unavailable_store_rejects_reads_and_writes() {
        let store = MemorySharedStore::new();
        store.set_available(false);
        assert!(matches!(
            store.read("k"),
            Err(RelayError::StorageUnavailable { .. })
        ));
        assert!(store.write("k", json!(null)).is_err());
        assert!(store.update("k", &mut |_| json!(null)).is_err());
        assert_eq!(store.revision(), Some(0));
    }
}
