//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `Room`: one broker, one shared store and a collecting observer that every client
//!   joined through it shares
//! - helpers to poll several clients and to pick events out of a client's queue
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{Room, poll_all};
//! ```

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use record_relay::telemetry::CollectingObserver;
use record_relay::{
    BroadcastBus, IdentityProvider, MemoryBroker, MemoryBusEndpoint, MemoryPrivateStore,
    MemorySharedStore, NoticeLevel, RelayBuilder, RelayClient, RelayEvent, Role, StaticIdentity,
};

/// Namespace used by every test room.
pub const NAMESPACE: &str = "test-room";

/// Installs a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Everything the clients of one room share.
pub struct Room {
    pub broker: MemoryBroker,
    pub shared: MemorySharedStore,
    pub observer: Arc<CollectingObserver>,
    seed: u64,
}

impl Room {
    pub fn new() -> Self {
        Self::with_shared(MemorySharedStore::new())
    }

    pub fn with_shared(shared: MemorySharedStore) -> Self {
        init_tracing();
        Self {
            broker: MemoryBroker::new(),
            shared,
            observer: Arc::new(CollectingObserver::new()),
            seed: 0,
        }
    }

    /// A builder preconfigured with the room's namespace, observer and a fresh id seed.
    pub fn builder(&mut self) -> RelayBuilder {
        self.seed += 1;
        RelayBuilder::new()
            .with_namespace(NAMESPACE)
            .with_violation_observer(self.observer.clone())
            .with_rng_seed(self.seed)
    }

    /// Joins with a static identity and an empty private store.
    pub fn join(&mut self, id: &str, name: &str, role: Role) -> RelayClient {
        let builder = self.builder();
        self.join_with(builder, StaticIdentity::new(id, name, role), MemoryPrivateStore::new())
    }

    pub fn join_with(
        &self,
        builder: RelayBuilder,
        identity: impl IdentityProvider + 'static,
        store: MemoryPrivateStore,
    ) -> RelayClient {
        builder
            .start(identity, store, self.shared.clone(), self.broker.endpoint())
            .expect("client should start")
    }

    /// An endpoint that only listens, subscribed to `topic`.
    pub fn spy(&self, topic: &str) -> MemoryBusEndpoint {
        let mut spy = self.broker.endpoint();
        spy.subscribe(topic);
        spy
    }
}

/// Polls every client once, in order.
pub fn poll_all(clients: &mut [&mut RelayClient]) {
    for client in clients.iter_mut() {
        client.poll();
    }
}

/// Drains a client's event queue.
pub fn drain(client: &mut RelayClient) -> Vec<RelayEvent> {
    client.events().collect()
}

/// The notice texts among `events`.
pub fn notices(events: &[RelayEvent], level: NoticeLevel) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RelayEvent::Notice {
                level: found,
                message,
            } if *found == level => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Number of view updates among `events`.
pub fn view_updates(events: &[RelayEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, RelayEvent::ViewUpdated { .. }))
        .count()
}
