//! The poll-driven client that ties the owner and viewer roles to the stores and the bus.

use std::collections::{vec_deque::Drain, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use web_time::Instant;

use crate::export::ExportDocument;
use crate::index::{IndexEntry, IndexPatch, SharedIndex};
use crate::network::codec::{decode_message, encode_message};
use crate::network::messages::{BusMessage, MessageKind, Topics};
use crate::report_violation;
use crate::sessions::owner::OwnerSession;
use crate::sessions::viewer::{ViewerSession, ViewerState};
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    now_millis, BroadcastBus, ClientId, Fields, IdentityProvider, NoticeLevel, PrivateStore,
    Record, RecordId, RelayError, RelayEvent, Role,
};

/// Display name used for records created while the identity provider is unreachable.
pub const LOCAL_DISPLAY_NAME: &str = "Local Player";

/// Owner label [`RelayClient::directory`] uses for the client's own records.
pub const OWN_LABEL: &str = "You";

/// An index entry as listed to a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// The entry as read from the shared index.
    pub entry: IndexEntry,
    /// Who owns the record: [`OWN_LABEL`] for the client's own records, the owner's display
    /// name otherwise.
    pub owner_label: String,
    /// Whether the record belongs to this client.
    pub is_own: bool,
}

impl DirectoryEntry {
    /// A tab label such as `Kaya (Ana)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({})", self.entry.display_name, self.owner_label)
    }
}

/// A [`RelayClient`] is one participant of a room: the owner of its own records and, while
/// its role is [`Role::Viewer`], a read-only viewer of everyone else's.
///
/// The client never blocks and never spawns. Call [`poll`](Self::poll) regularly (every frame,
/// or whenever the bus signals traffic); it answers requests addressed to this client,
/// applies responses and updates for the record being viewed, and notices index and role
/// changes. Everything a front-end has to render is queued as a [`RelayEvent`] and drained
/// through [`events`](Self::events).
///
/// Operations invoked by the user return a `Result` and, when they fail, also queue an
/// error-level notice. Failures are never retried.
///
/// ```
/// use record_relay::{
///     MemoryBroker, MemoryPrivateStore, MemorySharedStore, RelayBuilder, Role, StaticIdentity,
/// };
///
/// let broker = MemoryBroker::new();
/// let shared = MemorySharedStore::new();
///
/// let mut player = RelayBuilder::new()
///     .start(
///         StaticIdentity::new("p1", "Ana", Role::Owner),
///         MemoryPrivateStore::new(),
///         shared.clone(),
///         broker.endpoint(),
///     )
///     .unwrap();
/// let mut gm = RelayBuilder::new()
///     .start(
///         StaticIdentity::new("gm", "Game Master", Role::Viewer),
///         MemoryPrivateStore::new(),
///         shared,
///         broker.endpoint(),
///     )
///     .unwrap();
///
/// let record = player.create_record().unwrap();
/// gm.select_by_id(&record).unwrap();
/// player.poll(); // answers the request
/// gm.poll(); // shows the answer
/// assert!(gm.viewer_state().fields().is_some());
/// ```
pub struct RelayClient {
    identity: Box<dyn IdentityProvider>,
    private_store: Box<dyn PrivateStore>,
    index: SharedIndex,
    bus: Box<dyn BroadcastBus>,
    topics: Topics,
    owner: OwnerSession,
    viewer: ViewerSession,
    active: Option<RecordId>,
    role: Option<Role>,
    last_revision: Option<u64>,
    event_queue: VecDeque<RelayEvent>,
    event_queue_size: usize,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("index", &self.index)
            .field("topics", &self.topics)
            .field("owner", &self.owner)
            .field("viewer", &self.viewer)
            .field("active", &self.active)
            .field("role", &self.role)
            .field("last_revision", &self.last_revision)
            .field("pending_events", &self.event_queue.len())
            .field("has_observer", &self.violation_observer.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        identity: Box<dyn IdentityProvider>,
        private_store: Box<dyn PrivateStore>,
        index: SharedIndex,
        bus: Box<dyn BroadcastBus>,
        topics: Topics,
        owner: OwnerSession,
        viewer: ViewerSession,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
        event_queue_size: usize,
    ) -> Self {
        let role = identity.role().ok();
        let last_revision = index.revision();
        Self {
            identity,
            private_store,
            index,
            bus,
            topics,
            owner,
            viewer,
            active: None,
            role,
            last_revision,
            event_queue: VecDeque::new(),
            event_queue_size,
            violation_observer,
        }
    }

    /// Returns all events that happened since the last call. Events are dropped oldest
    /// first once more than the configured queue size are waiting.
    pub fn events(&mut self) -> Drain<'_, RelayEvent> {
        self.event_queue.drain(..)
    }

    /// Returns the violation observer, if one was configured.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }

    /// The shared index this client reads and writes.
    #[must_use]
    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// The topics this client publishes and listens on.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// What the viewer surface shows.
    #[must_use]
    pub fn viewer_state(&self) -> &ViewerState {
        self.viewer.state()
    }

    /// The role seen at the last identity check, if the provider answered.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The local record being edited, if any.
    #[must_use]
    pub fn active_record_id(&self) -> Option<&RecordId> {
        self.active.as_ref()
    }

    /// Receives and handles everything the bus delivered, then checks the shared index, the
    /// identity and the viewer's request timeout.
    pub fn poll(&mut self) {
        self.poll_identity();
        self.receive_messages();
        self.poll_index();

        if let Some(event) = self.viewer.check_timeout(Instant::now()) {
            let message = format!("No answer from {} yet.", self.viewer.owner_label());
            self.push_event(event);
            self.notice(NoticeLevel::Error, message);
        }
    }

    /// Tells the client the shared index changed, for environments that signal changes
    /// instead of exposing a revision counter.
    pub fn notify_index_changed(&mut self) {
        self.last_revision = self.index.revision();
        self.index_changed();
    }

    /// Tells the client the identity or role may have changed.
    pub fn notify_identity_changed(&mut self) {
        self.poll_identity();
    }

    /// Re-reads the index on the user's request.
    pub fn refresh(&mut self) {
        self.notify_index_changed();
        self.notice(NoticeLevel::Info, "Refreshed.");
    }

    // #####################
    // # OWNER OPERATIONS  #
    // #####################

    /// Creates a record owned by this client, stores it, makes it active and lists it in the
    /// index.
    ///
    /// Without a reachable identity provider the record is owned by [`ClientId::local`].
    pub fn create_record(&mut self) -> Result<RecordId, RelayError> {
        let (owner_id, owner_name) = self.current_identity();
        let record = self.owner.new_record(owner_id, owner_name, now_millis());
        let id = record.id.clone();
        let patch = IndexPatch::for_record(&record);
        if let Err(err) = self.private_store.put(record) {
            return self.fail(err, "Could not create a character");
        }
        info!(record = %id, "record created");
        self.activate(id.clone());
        self.write_index_entry(&id, &patch);
        self.notice(NoticeLevel::Info, "New character created.");
        Ok(id)
    }

    /// Merges `fields` into the active record.
    pub fn save(&mut self, fields: Fields) -> Result<(), RelayError> {
        let Some(id) = self.active.clone() else {
            return self.fail_with(RelayError::NoActiveRecord, "No local character to save.");
        };
        self.save_record(&id, fields)
    }

    /// Merges `fields` into the record, stores it, refreshes its index entry and pushes an
    /// update to a viewer that may be looking at it.
    pub fn save_record(&mut self, id: &RecordId, fields: Fields) -> Result<(), RelayError> {
        let mut record = self.load(id, "Could not save")?;
        record.merge_fields(fields);
        self.check_ownership(&record);
        let patch = IndexPatch::for_record(&record);
        let update = self.owner.update_for(&record);
        if let Err(err) = self.private_store.put(record) {
            return self.fail(err, "Could not save");
        }
        info!(record = %id, "record saved");
        self.write_index_entry(id, &patch);
        if let Some(update) = update {
            self.publish(&update);
        }
        self.notice(NoticeLevel::Info, "Saved.");
        Ok(())
    }

    /// Deletes a local record and removes its index entry.
    ///
    /// The index removal is best effort: if it fails the entry lingers until a viewer prunes
    /// it.
    pub fn delete_record(&mut self, id: &RecordId) -> Result<(), RelayError> {
        let record = self.load(id, "Could not delete")?;
        if let Err(err) = self.private_store.delete(id) {
            return self.fail(err, "Could not delete");
        }
        info!(record = %id, "record deleted");
        match self.index.remove(id) {
            Ok(true) => self.after_index_write(),
            Ok(false) => trace!(record = %id, "deleted record was not listed"),
            Err(err) => warn!(record = %id, error = %err, "could not remove index entry"),
        }
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        self.notice(
            NoticeLevel::Info,
            format!("Deleted \"{}\".", record.display_name()),
        );
        Ok(())
    }

    /// Deletes the active record.
    pub fn delete_active(&mut self) -> Result<(), RelayError> {
        let Some(id) = self.active.clone() else {
            return self.fail_with(RelayError::NoActiveRecord, "No character selected.");
        };
        self.delete_record(&id)
    }

    /// Makes a local record active. A viewer stops viewing and the surface becomes editable
    /// again.
    pub fn open_local(&mut self, id: &RecordId) -> Result<Record, RelayError> {
        let record = self.load(id, "Could not open")?;
        debug!(record = %id, "opened local record");
        self.activate(id.clone());
        Ok(record)
    }

    /// All records in the private store, in creation order.
    pub fn local_records(&mut self) -> Result<Vec<Record>, RelayError> {
        match self.private_store.list_owned() {
            Ok(records) => Ok(records),
            Err(err) => self.fail(err, "Could not list characters"),
        }
    }

    /// The active record, if one is active and still stored.
    pub fn active_record(&mut self) -> Result<Option<Record>, RelayError> {
        let Some(id) = self.active.clone() else {
            return Ok(None);
        };
        match self.private_store.get(&id) {
            Ok(record) => Ok(record),
            Err(err) => self.fail(err, "Could not load the character"),
        }
    }

    /// The export document for a local record.
    pub fn export_record(&mut self, id: &RecordId) -> Result<String, RelayError> {
        let record = self.load(id, "Nothing to export")?;
        match ExportDocument::new(record).to_json() {
            Ok(text) => Ok(text),
            Err(err) => self.fail(err, "Export failed"),
        }
    }

    /// The export document for the active record.
    pub fn export_active(&mut self) -> Result<String, RelayError> {
        let Some(id) = self.active.clone() else {
            return self.fail_with(RelayError::NoActiveRecord, "Nothing to export.");
        };
        self.export_record(&id)
    }

    /// Imports an export document as a record owned by this client and makes it active.
    ///
    /// The document's id is kept when present, so importing a record twice overwrites the
    /// first copy. An id the shared index already lists under another owner is replaced with
    /// a fresh one, leaving that owner's entry alone. A rejected document leaves every store untouched.
    pub fn import(&mut self, text: &str) -> Result<RecordId, RelayError> {
        let mut imported = match ExportDocument::parse(text) {
            Ok(imported) => imported,
            Err(err) => {
                report_violation!(
                    &self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Import,
                    None,
                    "rejected import: {}",
                    err
                );
                return self.fail_with(err, "Import failed (bad JSON?).");
            },
        };
        let previous_owner = imported.owner_id.clone();
        let (owner_id, owner_name) = self.current_identity();
        if let Some(id) = imported.id.take() {
            match self.index.get(&id) {
                Ok(Some(entry)) if entry.owner_id != owner_id => {
                    debug!(record = %id, listed_owner = %entry.owner_id, "imported id is taken, minting a fresh one");
                },
                _ => imported.id = Some(id),
            }
        }
        let owner = &mut self.owner;
        let record =
            imported.into_record(|| owner.next_record_id(), owner_id, owner_name, now_millis());
        if let Some(previous_owner) = previous_owner.filter(|prev| *prev != record.owner_id) {
            debug!(record = %record.id, from = %previous_owner, to = %record.owner_id, "import rebinds ownership");
        }
        let id = record.id.clone();
        let patch = IndexPatch::for_record(&record);
        if let Err(err) = self.private_store.put(record) {
            return self.fail(err, "Import failed");
        }
        info!(record = %id, "record imported");
        self.activate(id.clone());
        self.write_index_entry(&id, &patch);
        self.notice(NoticeLevel::Info, "Imported.");
        Ok(id)
    }

    // ######################
    // # VIEWER OPERATIONS  #
    // ######################

    /// Every listed record, labelled for display. Viewer only.
    pub fn directory(&mut self) -> Result<Vec<DirectoryEntry>, RelayError> {
        self.require_viewer("Only the game master can list other players' characters.")?;
        let entries = match self.index.read_all() {
            Ok(entries) => entries,
            Err(err) => return self.fail(err, "Could not read the character list"),
        };
        let self_id = self.identity.self_id().ok();
        Ok(entries
            .into_values()
            .map(|entry| {
                let is_own = self_id.as_ref() == Some(&entry.owner_id);
                let owner_label = if is_own {
                    OWN_LABEL.to_owned()
                } else {
                    entry.owner_display_name.clone()
                };
                DirectoryEntry {
                    entry,
                    owner_label,
                    is_own,
                }
            })
            .collect())
    }

    /// Starts viewing `entry`: clears the viewer surface and asks the owner for the record.
    /// Viewer only.
    ///
    /// Messages already delivered by the bus are handled first, against the previous
    /// selection.
    ///
    /// Nothing is shown until the owner answers during a later [`poll`](Self::poll). If the
    /// owner is offline nothing ever arrives; a [`ViewerConfig::request_timeout`](crate::ViewerConfig::request_timeout)
    /// makes that visible.
    pub fn select(&mut self, entry: &IndexEntry) -> Result<(), RelayError> {
        self.require_viewer("Only the game master can open other players' characters.")?;
        // traffic that arrived before the switch belongs to the previous selection
        self.receive_messages();
        let request = self.viewer.select(entry, Instant::now());
        self.publish(&request);
        if let Some(context) = self.viewer.context().cloned() {
            self.push_event(RelayEvent::ViewRequested { context });
        }
        self.notice(
            NoticeLevel::Info,
            format!(
                "Requesting \"{}\" from {}…",
                entry.display_name, entry.owner_display_name
            ),
        );
        Ok(())
    }

    /// Looks `record_id` up in the index and [`select`](Self::select)s it. Viewer only.
    pub fn select_by_id(&mut self, record_id: &RecordId) -> Result<(), RelayError> {
        self.require_viewer("Only the game master can open other players' characters.")?;
        match self.index.get(record_id) {
            Ok(Some(entry)) => self.select(&entry),
            Ok(None) => self.fail_with(
                RelayError::UnknownRecord {
                    id: record_id.clone(),
                },
                "That character is no longer listed.",
            ),
            Err(err) => self.fail(err, "Could not read the character list"),
        }
    }

    /// Removes a stale entry from the index. Returns `false` if it was already gone. Viewer
    /// only.
    pub fn prune(&mut self, record_id: &RecordId) -> Result<bool, RelayError> {
        self.require_viewer("Only the game master can remove listed characters.")?;
        match self.index.remove(record_id) {
            Ok(true) => {
                info!(record = %record_id, "index entry pruned");
                self.after_index_write();
                self.notice(NoticeLevel::Info, "Removed from list.");
                Ok(true)
            },
            Ok(false) => Ok(false),
            Err(err) => self.fail(err, "Could not update the character list"),
        }
    }

    // ##############
    // #  INTERNAL  #
    // ##############

    fn receive_messages(&mut self) {
        for (topic, payload) in self.bus.receive_all_messages() {
            let message = match decode_message(&payload) {
                Ok(message) => message,
                Err(err) => {
                    report_violation!(
                        &self.violation_observer,
                        ViolationSeverity::Warning,
                        ViolationKind::Broadcast,
                        None,
                        "dropped {} byte payload on {}: {}",
                        payload.len(),
                        topic,
                        err
                    );
                    continue;
                },
            };
            if topic == self.topics.request() {
                self.handle_request(&message);
            } else if topic == self.topics.push() {
                self.handle_push(&message);
            } else {
                trace!(topic = %topic, "message on a foreign topic; dropped");
            }
        }
    }

    fn handle_request(&mut self, message: &BusMessage) {
        if message.kind != MessageKind::Request {
            report_violation!(
                &self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Broadcast,
                Some(message.record_id.clone()),
                "{} on the request topic",
                message.kind
            );
            return;
        }
        if message.fields.is_some() {
            report_violation!(
                &self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Broadcast,
                Some(message.record_id.clone()),
                "request carries fields; ignoring them"
            );
        }
        let Ok(self_id) = self.identity.self_id() else {
            trace!(record = %message.record_id, "identity unavailable; request dropped");
            return;
        };
        match self
            .owner
            .handle_request(message, &self_id, self.private_store.as_ref())
        {
            Ok(Some(response)) => self.publish(&response),
            Ok(None) => {},
            Err(err) => warn!(record = %message.record_id, error = %err, "could not answer request"),
        }
    }

    fn handle_push(&mut self, message: &BusMessage) {
        if message.kind == MessageKind::Request {
            report_violation!(
                &self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Broadcast,
                Some(message.record_id.clone()),
                "request on the push topic"
            );
            return;
        }
        let Some(event) = self.viewer.handle_message(message) else {
            return;
        };
        let notice = match message.kind {
            MessageKind::Response => {
                format!("Viewing live character from {}.", self.viewer.owner_label())
            },
            _ => "View updated (owner saved).".to_owned(),
        };
        self.push_event(event);
        self.notice(NoticeLevel::Info, notice);
    }

    fn poll_identity(&mut self) {
        let Ok(role) = self.identity.role() else {
            return;
        };
        if self.role == Some(role) {
            return;
        }
        debug!(from = ?self.role, to = %role, "role changed");
        self.role = Some(role);
        self.push_event(RelayEvent::RoleChanged { role });
        if role != Role::Viewer {
            if let Some(event) = self.viewer.close() {
                self.push_event(event);
            }
        }
    }

    fn poll_index(&mut self) {
        let revision = self.index.revision();
        if revision.is_none() || revision == self.last_revision {
            return;
        }
        trace!(?revision, "index revision changed");
        self.last_revision = revision;
        self.index_changed();
    }

    fn index_changed(&mut self) {
        self.push_event(RelayEvent::IndexChanged);
        if !self.viewer.config().close_when_entry_removed || self.viewer.context().is_none() {
            return;
        }
        match self.index.read_all() {
            Ok(entries) => {
                if let Some(event) = self.viewer.on_index_refreshed(&entries) {
                    self.push_event(event);
                }
            },
            Err(err) => warn!(error = %err, "could not re-read the index"),
        }
    }

    fn after_index_write(&mut self) {
        self.last_revision = self.index.revision();
        self.index_changed();
    }

    fn write_index_entry(&mut self, id: &RecordId, patch: &IndexPatch) {
        match self.index.upsert(id, patch) {
            Ok(()) => self.after_index_write(),
            Err(err) => {
                warn!(record = %id, error = %err, "index upsert failed; the next save retries it");
            },
        }
    }

    fn activate(&mut self, id: RecordId) {
        self.active = Some(id);
        if let Some(event) = self.viewer.close() {
            self.push_event(event);
        }
    }

    fn load(&mut self, id: &RecordId, action: &str) -> Result<Record, RelayError> {
        match self.private_store.get(id) {
            Ok(Some(record)) => {
                if &record.id != id {
                    report_violation!(
                        &self.violation_observer,
                        ViolationSeverity::Error,
                        ViolationKind::PrivateStore,
                        Some(id.clone()),
                        "store returned record {} for {}",
                        record.id,
                        id
                    );
                }
                Ok(record)
            },
            Ok(None) => self.fail(RelayError::UnknownRecord { id: id.clone() }, action),
            Err(err) => self.fail(err, action),
        }
    }

    fn check_ownership(&self, record: &Record) {
        if let Ok(self_id) = self.identity.self_id() {
            if record.owner_id != self_id {
                report_violation!(
                    &self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Ownership,
                    Some(record.id.clone()),
                    "saving a record owned by {} as {}",
                    record.owner_id,
                    self_id
                );
            }
        }
    }

    fn require_viewer(&mut self, message: &str) -> Result<(), RelayError> {
        match self.identity.role() {
            Ok(Role::Viewer) => Ok(()),
            Ok(actual) => self.fail_with(
                RelayError::RoleMismatch {
                    expected: Role::Viewer,
                    actual,
                },
                message,
            ),
            Err(err) => self.fail(err, "Identity unavailable"),
        }
    }

    fn current_identity(&self) -> (ClientId, String) {
        let id = self.identity.self_id();
        let name = self.identity.display_name();
        match (id, name) {
            (Ok(id), Ok(name)) => (id, name),
            (Ok(id), Err(_)) => {
                let name = id.to_string();
                (id, name)
            },
            (Err(err), _) => {
                warn!(error = %err, "identity unavailable; using the local identity");
                (ClientId::local(), LOCAL_DISPLAY_NAME.to_owned())
            },
        }
    }

    fn publish(&mut self, message: &BusMessage) {
        match encode_message(message) {
            Ok(payload) => {
                let topic = self.topics.for_kind(message.kind);
                trace!(topic, kind = %message.kind, record = %message.record_id, "publishing");
                self.bus.publish(topic, &payload);
            },
            Err(err) => {
                report_violation!(
                    &self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::InternalError,
                    Some(message.record_id.clone()),
                    "could not encode {}: {}",
                    message.kind,
                    err
                );
            },
        }
    }

    /// Queues an error notice of the form `"{action}: {err}."` and returns `err`.
    fn fail<T>(&mut self, err: RelayError, action: &str) -> Result<T, RelayError> {
        let message = format!("{action}: {err}.");
        self.fail_with(err, message)
    }

    fn fail_with<T>(
        &mut self,
        err: RelayError,
        message: impl Into<String>,
    ) -> Result<T, RelayError> {
        warn!(error = %err, "operation failed");
        self.notice(NoticeLevel::Error, message);
        Err(err)
    }

    fn notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.push_event(RelayEvent::Notice {
            level,
            message: message.into(),
        });
    }

    fn push_event(&mut self, event: RelayEvent) {
        self.event_queue.push_back(event);
        while self.event_queue.len() > self.event_queue_size {
            self.event_queue.pop_front();
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
    use crate::telemetry::CollectingObserver;
    use crate::{
        MemoryBroker, MemoryPrivateStore, MemorySharedStore, RelayBuilder, RelayConfig,
        SharedIdentity, StaticIdentity,
    };

    fn notices(client: &mut RelayClient) -> Vec<(NoticeLevel, String)> {
        client
            .events()
            .filter_map(|event| match event {
                RelayEvent::Notice { level, message } => Some((level, message)),
                _ => None,
            })
            .collect()
    }

    fn owner(broker: &MemoryBroker, shared: &MemorySharedStore) -> RelayClient {
        RelayBuilder::new()
            .with_rng_seed(1)
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                MemoryPrivateStore::new(),
                shared.clone(),
                broker.endpoint(),
            )
            .unwrap()
    }

    #[test]
    fn create_queues_a_notice_and_activates() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let mut client = owner(&broker, &shared);
        let id = client.create_record().unwrap();
        assert_eq!(client.active_record_id(), Some(&id));
        let notices = notices(&mut client);
        assert!(notices.contains(&(NoticeLevel::Info, "New character created.".to_owned())));
    }

    #[test]
    fn save_without_active_record_fails_with_notice() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let mut client = owner(&broker, &shared);
        assert_eq!(client.save(Fields::new()), Err(RelayError::NoActiveRecord));
        assert_eq!(
            notices(&mut client),
            vec![(NoticeLevel::Error, "No local character to save.".to_owned())]
        );
    }

    #[test]
    fn owner_cannot_browse() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let mut client = owner(&broker, &shared);
        assert!(matches!(
            client.directory(),
            Err(RelayError::RoleMismatch {
                expected: Role::Viewer,
                actual: Role::Owner
            })
        ));
    }

    #[test]
    fn event_queue_drops_the_oldest() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let mut client = RelayBuilder::new()
            .with_relay_config(RelayConfig {
                event_queue_size: 2,
                ..RelayConfig::default()
            })
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                MemoryPrivateStore::new(),
                shared,
                broker.endpoint(),
            )
            .unwrap();
        client.refresh();
        client.refresh();
        let events: Vec<RelayEvent> = client.events().collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn offline_identity_creates_local_records() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let identity = SharedIdentity::disconnected();
        let mut client = RelayBuilder::new()
            .start(
                identity,
                MemoryPrivateStore::new(),
                shared.clone(),
                broker.endpoint(),
            )
            .unwrap();
        let id = client.create_record().unwrap();
        let record = client.active_record().unwrap().unwrap();
        assert!(record.owner_id.is_local());
        assert_eq!(record.owner_display_name, LOCAL_DISPLAY_NAME);
        assert!(client.index().get(&id).unwrap().is_some());
    }

    #[test]
    fn role_change_is_reported_and_closes_the_view() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let identity = SharedIdentity::new("gm", "GM", Role::Viewer);
        let mut gm = RelayBuilder::new()
            .start(
                identity.clone(),
                MemoryPrivateStore::new(),
                shared,
                broker.endpoint(),
            )
            .unwrap();
        gm.select(&IndexEntry {
            record_id: "r1".into(),
            display_name: "Kaya".to_owned(),
            owner_id: "p1".into(),
            owner_display_name: "Ana".to_owned(),
        })
        .unwrap();
        gm.events().for_each(drop);

        identity.set_role(Role::Owner);
        gm.notify_identity_changed();
        let events: Vec<RelayEvent> = gm.events().collect();
        assert!(events.contains(&RelayEvent::RoleChanged { role: Role::Owner }));
        assert!(events
            .iter()
            .any(|event| matches!(event, RelayEvent::ViewClosed { .. })));
        assert_eq!(gm.viewer_state(), &ViewerState::Idle);
    }

    #[test]
    fn undecodable_payloads_are_reported() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let collector = Arc::new(CollectingObserver::new());
        let mut client = RelayBuilder::new()
            .with_violation_observer(collector.clone())
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                MemoryPrivateStore::new(),
                shared,
                broker.endpoint(),
            )
            .unwrap();
        let mut rogue = broker.endpoint();
        rogue.publish(client.topics().request(), b"not a message");
        client.poll();
        assert!(collector.has_violation(ViolationKind::Broadcast));
    }

    #[test]
    fn failed_private_store_aborts_create() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let store = MemoryPrivateStore::new();
        store.set_available(false);
        let mut client = RelayBuilder::new()
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                store,
                shared.clone(),
                broker.endpoint(),
            )
            .unwrap();
        assert!(matches!(
            client.create_record(),
            Err(RelayError::StorageUnavailable { .. })
        ));
        assert!(client.active_record_id().is_none());
        assert!(client.index().read_all().unwrap().is_empty());
        let notices = notices(&mut client);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, NoticeLevel::Error);
    }

    #[test]
    fn directory_labels_own_records() {
        let broker = MemoryBroker::new();
        let shared = MemorySharedStore::new();
        let mut gm = RelayBuilder::new()
            .start(
                StaticIdentity::new("gm", "Game Master", Role::Viewer),
                MemoryPrivateStore::new(),
                shared.clone(),
                broker.endpoint(),
            )
            .unwrap();
        let mut player = owner(&broker, &shared);
        gm.create_record().unwrap();
        player.create_record().unwrap();

        let mut labels: Vec<String> = gm
            .directory()
            .unwrap()
            .iter()
            .map(DirectoryEntry::label)
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["New Character (Ana)", "New Character (You)"]);
    }
}
