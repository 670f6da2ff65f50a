//! The owner half of the protocol: creating records and answering requests for them.

use tracing::{debug, trace};

use crate::network::messages::{BusMessage, MessageKind};
use crate::record::{Record, NAME_FIELD};
use crate::rng::{Pcg32, SeedableRng};
use crate::sessions::config::OwnerConfig;
use crate::{ClientId, FieldValue, PrivateStore, RecordId, RelayError};

/// Answers requests for this client's records and seeds new ones.
///
/// Like [`ViewerSession`](crate::ViewerSession) it performs no I/O of its own; the
/// [`RelayClient`](crate::RelayClient) hands it the private store and publishes what it
/// returns.
#[derive(Debug, Clone)]
pub struct OwnerSession {
    config: OwnerConfig,
    rng: Pcg32,
}

impl OwnerSession {
    /// Creates an owner session drawing record ids from `rng`.
    #[must_use]
    pub fn new(config: OwnerConfig, rng: Pcg32) -> Self {
        Self { config, rng }
    }

    /// Creates an owner session with an entropy-seeded id generator.
    #[must_use]
    pub fn from_entropy(config: OwnerConfig) -> Self {
        Self::new(config, Pcg32::from_entropy())
    }

    /// The session's configuration.
    #[must_use]
    pub fn config(&self) -> &OwnerConfig {
        &self.config
    }

    /// Draws a fresh record id.
    pub fn next_record_id(&mut self) -> RecordId {
        RecordId::generate(&mut self.rng)
    }

    /// A new record owned by `owner_id`, seeded from the configured schema and named with
    /// the configured default name.
    pub fn new_record(
        &mut self,
        owner_id: ClientId,
        owner_display_name: impl Into<String>,
        created_at: u64,
    ) -> Record {
        let id = self.next_record_id();
        let mut record = Record::new(id, owner_id, owner_display_name, created_at);
        record.fields = self.config.schema.blank_fields();
        record.fields.insert(
            NAME_FIELD.to_owned(),
            FieldValue::from(self.config.default_record_name.as_str()),
        );
        record
    }

    /// The update to publish after `record` was saved, unless pushing is disabled.
    #[must_use]
    pub fn update_for(&self, record: &Record) -> Option<BusMessage> {
        self.config.push_updates.then(|| {
            BusMessage::update(
                record.id.clone(),
                record.owner_id.clone(),
                record.fields.clone(),
            )
        })
    }

    /// Answers a request received on the request topic.
    ///
    /// Returns the response to publish, or `None` if the request is addressed to another
    /// owner or names a record this client does not have. Both cases are silent: there is
    /// no way to tell a viewer that it asked the wrong client.
    ///
    /// The check only compares the request's owner with `self_id`. Nothing authenticates
    /// the requester; every client on the bus can read the response.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageUnavailable`] if the private store cannot be read.
    pub fn handle_request(
        &self,
        request: &BusMessage,
        self_id: &ClientId,
        store: &dyn PrivateStore,
    ) -> Result<Option<BusMessage>, RelayError> {
        if request.kind != MessageKind::Request {
            trace!(kind = %request.kind, "owner ignores non-requests");
            return Ok(None);
        }
        if &request.owner_id != self_id {
            trace!(
                record = %request.record_id,
                owner = %request.owner_id,
                "request addressed to another owner; dropped"
            );
            return Ok(None);
        }
        match store.get(&request.record_id)? {
            Some(record) => {
                debug!(record = %record.id, "answering request");
                Ok(Some(BusMessage::response(
                    record.id,
                    self_id.clone(),
                    record.fields,
                )))
            },
            None => {
                trace!(record = %request.record_id, "request for a record we do not hold; dropped");
                Ok(None)
            },
        }
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
    use crate::record::FieldSchema;
    use crate::MemoryPrivateStore;

    fn session() -> OwnerSession {
        OwnerSession::new(OwnerConfig::default(), Pcg32::seed_from_u64(3))
    }

    #[test]
    fn new_records_are_seeded_from_the_schema() {
        let mut owner = session();
        let record = owner.new_record("p1".into(), "Ana", 10);
        assert_eq!(record.owner_id, ClientId::from("p1"));
        assert_eq!(record.owner_display_name, "Ana");
        assert_eq!(record.created_at, 10);
        assert_eq!(record.display_name(), "New Character");
        assert!(record.fields.len() >= FieldSchema::character_sheet().len());
    }

    #[test]
    fn new_records_get_distinct_ids() {
        let mut owner = session();
        let a = owner.new_record("p1".into(), "Ana", 0);
        let b = owner.new_record("p1".into(), "Ana", 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn request_for_own_record_is_answered() {
        let mut owner = session();
        let mut store = MemoryPrivateStore::new();
        let record = owner.new_record("p1".into(), "Ana", 0);
        store.put(record.clone()).unwrap();

        let request = BusMessage::request(record.id.clone(), "p1".into());
        let response = owner
            .handle_request(&request, &"p1".into(), &store)
            .unwrap()
            .unwrap();
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.owner_id, ClientId::from("p1"));
        assert_eq!(response.fields, Some(record.fields));
    }

    #[test]
    fn request_for_another_owner_is_ignored() {
        let mut owner = session();
        let mut store = MemoryPrivateStore::new();
        let record = owner.new_record("p1".into(), "Ana", 0);
        store.put(record.clone()).unwrap();

        let request = BusMessage::request(record.id, "p2".into());
        assert!(owner
            .handle_request(&request, &"p1".into(), &store)
            .unwrap()
            .is_none());
    }

    #[test]
    fn request_for_unknown_record_is_ignored() {
        let owner = session();
        let store = MemoryPrivateStore::new();
        let request = BusMessage::request("missing".into(), "p1".into());
        assert!(owner
            .handle_request(&request, &"p1".into(), &store)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unavailable_store_is_an_error() {
        let owner = session();
        let store = MemoryPrivateStore::new();
        store.set_available(false);
        let request = BusMessage::request("r1".into(), "p1".into());
        assert!(matches!(
            owner.handle_request(&request, &"p1".into(), &store),
            Err(RelayError::StorageUnavailable { .. })
        ));
    }

    #[test]
    fn quiet_owner_pushes_nothing() {
        let mut owner = OwnerSession::new(OwnerConfig::quiet(), Pcg32::seed_from_u64(1));
        let record = owner.new_record("p1".into(), "Ana", 0);
        assert!(owner.update_for(&record).is_none());
        assert!(session().update_for(&record).is_some());
    }
}
