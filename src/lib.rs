//! # Record Relay
//!
//! Record Relay lets independent clients keep full records private while sharing read-only
//! views of them with a distinguished viewer client (a game master, a facilitator).
//! Full record contents never reach shared storage. Instead the crate coordinates three
//! loosely coupled primitives:
//!
//! - a per-client [`PrivateStore`] holding the full records,
//! - a [`SharedIndex`] of non-sensitive metadata (display name and owner) visible to everyone,
//! - an unreliable, ephemeral [`BroadcastBus`] used to request and push live record data.
//!
//! ```text
//! ┌────────────┐  upsert entry   ┌──────────────┐   read_all   ┌────────────┐
//! │   Owner    │ ──────────────► │ Shared Index │ ◄─────────── │   Viewer   │
//! │ (private   │                 └──────────────┘              │ (read-only │
//! │  store)    │ ◄──────────── REQUEST{record, owner} ──────── │  surface)  │
//! │            │ ── RESPONSE / UPDATE{record, owner, fields} ─►│            │
//! └────────────┘                  broadcast bus                └────────────┘
//! ```
//!
//! Every primitive is a trait you implement for your environment. In-memory implementations
//! ([`MemoryPrivateStore`], [`MemorySharedStore`], [`MemoryBroker`]) back the tests and are
//! handy for local tooling.
//!
//! A [`RelayClient`] is poll-driven: call [`RelayClient::poll`] periodically, then drain
//! [`RelayClient::events`] and render what they describe.

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use error::RelayError;
pub use export::{ExportDocument, EXPORT_KIND, EXPORT_VERSION};
pub use identity::{SharedIdentity, StaticIdentity};
pub use index::{IndexEntry, IndexPatch, IndexSnapshot, IndexWriteMode, SharedIndex};
pub use network::chaos_bus::{ChaosBus, ChaosConfig, ChaosConfigBuilder, ChaosStats};
pub use network::memory_bus::{MemoryBroker, MemoryBusEndpoint, DEFAULT_INBOX_CAPACITY};
pub use network::messages::{BusMessage, MessageKind, Topics};
#[cfg(feature = "tokio")]
pub use network::tokio_bus::TokioBroadcastBus;
pub use record::{FieldKind, FieldSchema, FieldValue, Fields, Record};
pub use sessions::builder::RelayBuilder;
pub use sessions::client::{DirectoryEntry, RelayClient};
pub use sessions::config::{OwnerConfig, RelayConfig, ViewerConfig};
pub use sessions::owner::OwnerSession;
pub use sessions::viewer::{ViewerSession, ViewerState, ViewingContext};
pub use store::private_store::{FilePrivateStore, MemoryPrivateStore};
pub use store::shared_store::MemorySharedStore;

pub mod error;
pub mod export;
pub mod identity;
pub mod index;
pub mod prelude;
pub mod record;
/// Internal random number generator module based on PCG32.
///
/// Used for record identifiers and the fault decisions of [`ChaosBus`].
pub mod rng;
pub mod telemetry;
pub mod sessions {
    //! Owner and viewer halves of the synchronization protocol and the client composing them.
    pub mod builder;
    pub mod client;
    pub mod config;
    pub mod owner;
    pub mod viewer;
}
pub mod network {
    //! Bus message types, their wire codec and the bundled [`BroadcastBus`](crate::BroadcastBus) implementations.
    pub mod chaos_bus;
    /// Binary codec for broadcast payloads.
    ///
    /// Provides centralized encoding and decoding of bus messages using bincode.
    pub mod codec;
    pub mod memory_bus;
    pub mod messages;
    #[cfg(feature = "tokio")]
    pub mod tokio_bus;
}
pub mod store {
    //! Bundled [`PrivateStore`](crate::PrivateStore) and [`SharedStore`](crate::SharedStore) implementations.
    pub mod private_store;
    pub mod shared_store;
}

// #############
// #   TYPES   #
// #############

/// Identity of a client, as reported by the [`IdentityProvider`].
///
/// The value is opaque to the protocol; it is only ever compared for equality.
///
/// # Examples
///
/// ```
/// use record_relay::ClientId;
///
/// let id = ClientId::new("p1");
/// assert_eq!(id.as_str(), "p1");
/// assert_eq!(id, ClientId::from("p1"));
/// assert!(ClientId::local().is_local());
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Identity used for records created while no identity provider is reachable.
    pub const LOCAL: &'static str = "local";

    /// Creates a new `ClientId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    /// The fallback identity for a client running without an identity provider.
    #[must_use]
    pub fn local() -> Self {
        ClientId(Self::LOCAL.to_owned())
    }

    /// Returns `true` if this is the [`local`](Self::local) fallback identity.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId(value.to_owned())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        ClientId(value)
    }
}

/// Opaque identifier of a [`Record`].
///
/// Fresh identifiers are random 128-bit values in UUID v4 text form.
///
/// # Examples
///
/// ```
/// use record_relay::RecordId;
/// use record_relay::rng::{Pcg32, SeedableRng};
///
/// let mut rng = Pcg32::seed_from_u64(7);
/// let id = RecordId::generate(&mut rng);
/// assert_eq!(id.as_str().len(), 36);
/// assert_ne!(id, RecordId::generate(&mut rng));
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a `RecordId` from an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate<R: rng::Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&rng.next_u64().to_le_bytes());
        bytes[8..].copy_from_slice(&rng.next_u64().to_le_bytes());
        RecordId(
            uuid::Builder::from_random_bytes(bytes)
                .into_uuid()
                .hyphenated()
                .to_string(),
        )
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId(value.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId(value)
    }
}

// #############
// #   ENUMS   #
// #############

/// The role a client holds in the room.
///
/// Every client owns its own records. Only [`Role::Viewer`] clients may browse the shared
/// index and request other owners' records. The role can change at runtime; call
/// [`RelayClient::notify_identity_changed`] when it does.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A regular participant that only shares its own records.
    #[default]
    Owner,
    /// A participant that can discover and view everyone's records read-only.
    Viewer,
}

impl Role {
    /// Returns a string representation suitable for logs and labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How prominent a [`RelayEvent::Notice`] should be when shown to the user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    /// Confirmation of a completed operation.
    Info,
    /// An operation failed and was aborted.
    Error,
}

/// Notifications that you can receive from the client. Rendering them is up to the user.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new event types may be
/// added in future versions. Always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RelayEvent {
    /// A short user-facing message, typically shown as a toast.
    Notice {
        /// Whether the message reports success or failure.
        level: NoticeLevel,
        /// The message text.
        message: String,
    },
    /// The shared index changed. Re-read [`RelayClient::directory`] to refresh listings.
    IndexChanged,
    /// The client's role changed.
    RoleChanged {
        /// The new role.
        role: Role,
    },
    /// The viewer requested a record and cleared its surface.
    ViewRequested {
        /// The record now being requested.
        context: ViewingContext,
    },
    /// The viewer received live data for the record it is viewing. Render `fields` read-only.
    ViewUpdated {
        /// The record being viewed.
        context: ViewingContext,
        /// The record's fields as sent by its owner.
        fields: Fields,
        /// Whether the data answers a request or was pushed after a save.
        source: MessageKind,
    },
    /// The viewer stopped viewing a record and returned to idle.
    ViewClosed {
        /// The record that was being viewed.
        context: ViewingContext,
    },
    /// No response arrived within the configured request timeout. The request stays outstanding.
    RequestTimedOut {
        /// The record still being requested.
        context: ViewingContext,
        /// Milliseconds since the request was published.
        waited_ms: u128,
    },
}

// #############
// #  TRAITS   #
// #############

/// Supplies this client's identity and role. Implemented by the host environment.
///
/// Implementations are trusted; the protocol performs no further verification.
pub trait IdentityProvider {
    /// Returns the stable identity of this client.
    fn self_id(&self) -> Result<ClientId, RelayError>;

    /// Returns the name other clients should see for this client.
    fn display_name(&self) -> Result<String, RelayError>;

    /// Returns the role currently held by this client.
    fn role(&self) -> Result<Role, RelayError>;
}

/// Per-client durable storage of full records.
///
/// Only the owning client reads or writes it. The only failure mode is
/// [`RelayError::StorageUnavailable`].
pub trait PrivateStore {
    /// Returns the record with the given identifier, if present.
    fn get(&self, id: &RecordId) -> Result<Option<Record>, RelayError>;

    /// Inserts or replaces a record. Replacing keeps the record's position in [`list_owned`](Self::list_owned).
    fn put(&mut self, record: Record) -> Result<(), RelayError>;

    /// Removes the record with the given identifier. Removing an absent record is not an error.
    fn delete(&mut self, id: &RecordId) -> Result<(), RelayError>;

    /// Returns all stored records in insertion order.
    fn list_owned(&self) -> Result<Vec<Record>, RelayError>;
}

/// A small, eventually consistent key/value bag visible to every client in the room.
///
/// Values are JSON documents. Methods take `&self`: the store is shared by nature and
/// implementations synchronize internally.
pub trait SharedStore {
    /// Reads the value under `key`.
    fn read(&self, key: &str) -> Result<Option<serde_json::Value>, RelayError>;

    /// Replaces the value under `key`.
    fn write(&self, key: &str, value: serde_json::Value) -> Result<(), RelayError>;

    /// Returns `true` if [`update`](Self::update) is atomic with respect to other clients.
    fn supports_atomic_update(&self) -> bool {
        false
    }

    /// Replaces the value under `key` with `apply(current)`.
    ///
    /// The default implementation is a plain read followed by a write and is therefore
    /// not atomic.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<serde_json::Value>) -> serde_json::Value,
    ) -> Result<(), RelayError> {
        let current = self.read(key)?;
        self.write(key, apply(current))
    }

    /// A counter that increases whenever any value in the store changes, if the store
    /// tracks one. [`RelayClient::poll`] uses it as a change notification.
    fn revision(&self) -> Option<u64> {
        None
    }
}

/// Topic-based publish/subscribe transport. Implemented by the host environment.
///
/// Messages should be delivered like UDP datagrams: at most once, only to endpoints that
/// are subscribed at delivery time, with no acknowledgement and no ordering across topics
/// or senders. The protocol never relies on more than that.
pub trait BroadcastBus {
    /// Hands `payload` to the transport for delivery on `topic`. Never blocks, never fails.
    fn publish(&mut self, topic: &str, payload: &[u8]);

    /// Starts receiving messages published on `topic`.
    fn subscribe(&mut self, topic: &str);

    /// Stops receiving messages published on `topic`.
    fn unsubscribe(&mut self, topic: &str);

    /// This method should return all messages received since the last time this method was called.
    /// The pairs `(topic, payload)` indicate on which topic each message was received.
    fn receive_all_messages(&mut self) -> Vec<(String, Vec<u8>)>;
}

impl<B: BroadcastBus + ?Sized> BroadcastBus for Box<B> {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        (**self).publish(topic, payload);
    }

    fn subscribe(&mut self, topic: &str) {
        (**self).subscribe(topic);
    }

    fn unsubscribe(&mut self, topic: &str) {
        (**self).unsubscribe(topic);
    }

    fn receive_all_messages(&mut self) -> Vec<(String, Vec<u8>)> {
        (**self).receive_all_messages()
    }
}

/// Milliseconds since the Unix epoch, used for [`Record::created_at`].
pub(crate) fn now_millis() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::rng::{Pcg32, SeedableRng};

    #[test]
    fn generated_record_ids_are_uuid_v4_shaped() {
        let mut rng = Pcg32::seed_from_u64(42);
        for _ in 0..32 {
            let id = RecordId::generate(&mut rng);
            let parsed = uuid::Uuid::parse_str(id.as_str()).unwrap();
            assert_eq!(parsed.get_version_num(), 4);
            assert_eq!(parsed.get_variant(), uuid::Variant::RFC4122);
            assert_eq!(id.as_str(), parsed.hyphenated().to_string());
        }
    }

    #[test]
    fn generated_record_ids_are_deterministic_per_seed() {
        let a = RecordId::generate(&mut Pcg32::seed_from_u64(1));
        let b = RecordId::generate(&mut Pcg32::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ClientId::new("p1")).unwrap();
        assert_eq!(json, "\"p1\"");
        let id: RecordId = serde_json::from_str("\"r1\"").unwrap();
        assert_eq!(id, RecordId::from("r1"));
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(Role::Owner.to_string(), "owner");
        assert_eq!(Role::Viewer.to_string(), "viewer");
        assert_eq!(Role::default(), Role::Owner);
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
