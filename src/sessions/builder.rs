//! Assembling a [`RelayClient`](crate::RelayClient) from its stores, bus and identity.

use std::sync::Arc;

use crate::index::SharedIndex;
use crate::network::messages::Topics;
use crate::report_violation;
use crate::rng::{Pcg32, SeedableRng};
use crate::sessions::client::RelayClient;
use crate::sessions::config::{OwnerConfig, RelayConfig, ViewerConfig};
use crate::sessions::owner::OwnerSession;
use crate::sessions::viewer::ViewerSession;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{BroadcastBus, IdentityProvider, PrivateStore, RelayError, SharedStore};

/// The [`RelayBuilder`] builds [`RelayClient`]s.
///
/// After setting all appropriate values, use [`RelayBuilder::start`] to consume the builder
/// and join a room.
#[must_use = "RelayBuilder must be consumed by calling start()"]
pub struct RelayBuilder {
    relay_config: RelayConfig,
    viewer_config: ViewerConfig,
    owner_config: OwnerConfig,
    /// Optional observer for protocol violations.
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    /// Seed for record ids. Entropy when `None`.
    rng_seed: Option<u64>,
}

impl std::fmt::Debug for RelayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            relay_config,
            viewer_config,
            owner_config,
            violation_observer,
            rng_seed,
        } = self;

        f.debug_struct("RelayBuilder")
            .field("relay_config", relay_config)
            .field("viewer_config", viewer_config)
            .field("owner_config", owner_config)
            .field("has_violation_observer", &violation_observer.is_some())
            .field("rng_seed", rng_seed)
            .finish()
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBuilder {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            relay_config: RelayConfig::default(),
            viewer_config: ViewerConfig::default(),
            owner_config: OwnerConfig::default(),
            violation_observer: None,
            rng_seed: None,
        }
    }

    /// Sets the namespace of the room. Shorthand for changing
    /// [`RelayConfig::namespace`].
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.relay_config.namespace = namespace.into();
        self
    }

    /// Sets the room-wide configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use record_relay::{RelayBuilder, RelayConfig};
    ///
    /// let builder = RelayBuilder::new().with_relay_config(RelayConfig {
    ///     namespace: "dsp-sheet".to_owned(),
    ///     ..RelayConfig::atomic()
    /// });
    /// ```
    pub fn with_relay_config(mut self, relay_config: RelayConfig) -> Self {
        self.relay_config = relay_config;
        self
    }

    /// Sets the viewer behavior.
    pub fn with_viewer_config(mut self, viewer_config: ViewerConfig) -> Self {
        self.viewer_config = viewer_config;
        self
    }

    /// Sets the owner behavior.
    pub fn with_owner_config(mut self, owner_config: OwnerConfig) -> Self {
        self.owner_config = owner_config;
        self
    }

    /// Sets a violation observer for monitoring protocol anomalies.
    ///
    /// The observer sees everything the client and its shared index consider suspicious:
    /// undecodable payloads, index entries carrying fields or lacking an owner, rejected
    /// imports. Without one, violations are logged through `tracing`.
    ///
    /// # Example
    ///
    /// ```
    /// use record_relay::telemetry::CollectingObserver;
    /// use record_relay::RelayBuilder;
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = RelayBuilder::new().with_violation_observer(observer.clone());
    /// // After starting a client and polling it, inspect observer.violations()
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Seeds the record id generator, making ids reproducible. Intended for tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Consumes the builder and joins the room: wraps `shared_store` in a [`SharedIndex`]
    /// and subscribes `bus` to both topics of the namespace.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if a configuration fails validation, or if
    ///   [`IndexWriteMode::Atomic`](crate::IndexWriteMode::Atomic) is requested for a store
    ///   without atomic updates.
    ///
    /// [`InvalidRequest`]: RelayError::InvalidRequest
    pub fn start(
        self,
        identity: impl IdentityProvider + 'static,
        private_store: impl PrivateStore + 'static,
        shared_store: impl SharedStore + 'static,
        bus: impl BroadcastBus + 'static,
    ) -> Result<RelayClient, RelayError> {
        if let Err(err) = self.validate() {
            report_violation!(
                &self.violation_observer,
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                None,
                "refusing to start: {}",
                err
            );
            return Err(err);
        }

        let namespace = &self.relay_config.namespace;
        let mut index = SharedIndex::with_write_mode(
            Box::new(shared_store),
            namespace,
            self.relay_config.index_write_mode,
        )?;
        index.set_observer(self.violation_observer.clone());

        let topics = Topics::new(namespace);
        let mut bus: Box<dyn BroadcastBus> = Box::new(bus);
        for topic in topics.all() {
            bus.subscribe(topic);
        }
        tracing::debug!(namespace = %namespace, mode = ?index.mode(), "joined room");

        let rng = self
            .rng_seed
            .map_or_else(Pcg32::from_entropy, Pcg32::seed_from_u64);

        Ok(RelayClient::new(
            Box::new(identity),
            Box::new(private_store),
            index,
            bus,
            topics,
            OwnerSession::new(self.owner_config, rng),
            ViewerSession::new(self.viewer_config),
            self.violation_observer,
            self.relay_config.event_queue_size,
        ))
    }

    fn validate(&self) -> Result<(), RelayError> {
        self.relay_config.validate()?;
        self.viewer_config.validate()?;
        self.owner_config.validate()
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
        IndexWriteMode, MemoryBroker, MemoryPrivateStore, MemorySharedStore, Role,
        StaticIdentity,
    };
    use web_time::Duration;

    fn identity() -> StaticIdentity {
        StaticIdentity::new("p1", "Ana", Role::Owner)
    }

    #[test]
    fn start_subscribes_both_topics() {
        let broker = MemoryBroker::new();
        let client = RelayBuilder::new()
            .with_namespace("dsp")
            .start(
                identity(),
                MemoryPrivateStore::new(),
                MemorySharedStore::new(),
                broker.endpoint(),
            )
            .unwrap();
        assert_eq!(broker.subscriber_count("dsp:req-record"), 1);
        assert_eq!(broker.subscriber_count("dsp:push-record"), 1);
        assert_eq!(client.index().key(), "dsp:index");
    }

    #[test]
    fn invalid_config_is_rejected_and_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let result = RelayBuilder::new()
            .with_namespace("has space")
            .with_violation_observer(observer.clone())
            .start(
                identity(),
                MemoryPrivateStore::new(),
                MemorySharedStore::new(),
                MemoryBroker::new().endpoint(),
            );
        assert!(matches!(result, Err(RelayError::InvalidRequest { .. })));
        assert!(observer.has_violation(ViolationKind::Configuration));
    }

    #[test]
    fn invalid_viewer_config_is_rejected() {
        let result = RelayBuilder::new()
            .with_viewer_config(ViewerConfig {
                request_timeout: Some(Duration::ZERO),
                ..ViewerConfig::default()
            })
            .start(
                identity(),
                MemoryPrivateStore::new(),
                MemorySharedStore::new(),
                MemoryBroker::new().endpoint(),
            );
        assert!(result.is_err());
    }

    #[test]
    fn atomic_mode_needs_an_atomic_store() {
        let result = RelayBuilder::new()
            .with_relay_config(RelayConfig::atomic())
            .start(
                identity(),
                MemoryPrivateStore::new(),
                MemorySharedStore::without_atomic_update(),
                MemoryBroker::new().endpoint(),
            );
        assert!(matches!(result, Err(RelayError::InvalidRequest { .. })));

        let client = RelayBuilder::new()
            .with_relay_config(RelayConfig::atomic())
            .start(
                identity(),
                MemoryPrivateStore::new(),
                MemorySharedStore::new(),
                MemoryBroker::new().endpoint(),
            )
            .unwrap();
        assert_eq!(client.index().mode(), IndexWriteMode::Atomic);
    }

    #[test]
    fn seeded_builders_generate_the_same_ids() {
        let start = || {
            RelayBuilder::new()
                .with_rng_seed(9)
                .start(
                    identity(),
                    MemoryPrivateStore::new(),
                    MemorySharedStore::new(),
                    MemoryBroker::new().endpoint(),
                )
                .unwrap()
        };
        let (mut a, mut b) = (start(), start());
        assert_eq!(a.create_record().unwrap(), b.create_record().unwrap());
    }
}
