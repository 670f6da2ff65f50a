//! A configurable bus wrapper for fault injection testing.
//!
//! [`ChaosBus`] wraps any [`BroadcastBus`] to simulate what real broadcast transports do to
//! messages: latency, jitter, loss, reordering and duplication. The relay must keep every
//! guarantee under all of them.
//!
//! # Example
//!
//! ```rust
//! use record_relay::{BroadcastBus, ChaosBus, ChaosConfig, MemoryBroker};
//!
//! let config = ChaosConfig::builder()
//!     .loss_rate(0.2)
//!     .duplication_rate(0.1)
//!     .reorder_buffer_size(4)
//!     .reorder_rate(0.5)
//!     .seed(42) // deterministic for testing
//!     .build();
//!
//! let broker = MemoryBroker::new();
//! let mut bus = ChaosBus::new(broker.endpoint(), config);
//! bus.subscribe("room:push-record");
//! ```

use std::collections::VecDeque;

use web_time::{Duration, Instant};

use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::BroadcastBus;

/// Configuration for bus chaos simulation.
///
/// Use [`ChaosConfig::builder()`] for a fluent configuration API.
/// All durations default to zero and all rates default to 0.0 (no effect).
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Base latency added to every received message (default: 0ms)
    pub latency: Duration,

    /// Maximum random jitter added to or subtracted from latency (default: 0ms)
    pub jitter: Duration,

    /// Probability of dropping a message on publish (0.0 - 1.0, default: 0.0)
    pub publish_loss_rate: f64,

    /// Probability of dropping a message on receive (0.0 - 1.0, default: 0.0)
    pub receive_loss_rate: f64,

    /// Probability of publishing a message twice (0.0 - 1.0, default: 0.0)
    pub duplication_rate: f64,

    /// Number of messages buffered before they may be released out of order (default: 0)
    pub reorder_buffer_size: usize,

    /// Probability of swapping each buffered message with a random other (0.0 - 1.0, default: 0.0)
    pub reorder_rate: f64,

    /// Random seed for deterministic behavior (default: random)
    pub seed: Option<u64>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            publish_loss_rate: 0.0,
            receive_loss_rate: 0.0,
            duplication_rate: 0.0,
            reorder_buffer_size: 0,
            reorder_rate: 0.0,
            seed: None,
        }
    }
}

impl ChaosConfig {
    /// Creates a new builder for fluent configuration.
    #[must_use]
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::new()
    }

    /// Creates a config with no chaos (passthrough mode).
    #[must_use]
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Creates a config dropping messages in both directions at `loss_rate`.
    #[must_use]
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            publish_loss_rate: loss_rate,
            receive_loss_rate: loss_rate,
            ..Default::default()
        }
    }

    /// Creates a config that loses, duplicates and reorders without adding latency, for
    /// tests that poll in a tight loop.
    #[must_use]
    pub fn scrambled(seed: u64) -> Self {
        Self {
            publish_loss_rate: 0.1,
            receive_loss_rate: 0.1,
            duplication_rate: 0.2,
            reorder_buffer_size: 3,
            reorder_rate: 0.5,
            seed: Some(seed),
            ..Default::default()
        }
    }
}

/// Builder for [`ChaosConfig`].
#[derive(Debug, Clone, Default)]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base latency for all messages.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// Sets the maximum jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Sets the loss rate for both publish and receive.
    #[must_use]
    pub fn loss_rate(mut self, rate: f64) -> Self {
        self.config.publish_loss_rate = rate.clamp(0.0, 1.0);
        self.config.receive_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the loss rate for publishing only.
    #[must_use]
    pub fn publish_loss_rate(mut self, rate: f64) -> Self {
        self.config.publish_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the loss rate for receiving only.
    #[must_use]
    pub fn receive_loss_rate(mut self, rate: f64) -> Self {
        self.config.receive_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the duplication rate.
    #[must_use]
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the reorder buffer size.
    #[must_use]
    pub fn reorder_buffer_size(mut self, size: usize) -> Self {
        self.config.reorder_buffer_size = size;
        self
    }

    /// Sets the reorder rate.
    #[must_use]
    pub fn reorder_rate(mut self, rate: f64) -> Self {
        self.config.reorder_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the random seed for deterministic behavior.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Statistics about chaos bus behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Messages handed to [`BroadcastBus::publish`]
    pub published: u64,
    /// Messages dropped on publish
    pub dropped_publish: u64,
    /// Messages published twice
    pub duplicated: u64,
    /// Messages released to the caller
    pub received: u64,
    /// Messages dropped on receive
    pub dropped_receive: u64,
    /// Swaps performed while reordering
    pub reordered: u64,
}

#[derive(Debug, Clone)]
struct InFlight {
    topic: String,
    payload: Vec<u8>,
    deliver_at: Instant,
}

/// A bus wrapper that injects configurable faults.
#[derive(Debug)]
pub struct ChaosBus<B: BroadcastBus> {
    inner: B,
    config: ChaosConfig,
    rng: Pcg32,
    in_flight: VecDeque<InFlight>,
    reorder_buffer: Vec<(String, Vec<u8>)>,
    stats: ChaosStats,
}

impl<B: BroadcastBus> ChaosBus<B> {
    /// Creates a new chaos bus wrapping `inner`.
    pub fn new(inner: B, config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };
        Self {
            inner,
            config,
            rng,
            in_flight: VecDeque::new(),
            reorder_buffer: Vec::new(),
            stats: ChaosStats::default(),
        }
    }

    /// Returns a reference to the inner bus.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Consumes the chaos bus and returns the inner bus. Messages still in flight are lost.
    pub fn into_inner(self) -> B {
        self.inner
    }

    /// Returns the current chaos configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Updates the chaos configuration. The random stream is kept.
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    /// Returns statistics about chaos behavior.
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Number of messages held back by latency or the reorder buffer.
    pub fn held_back(&self) -> usize {
        self.in_flight.len() + self.reorder_buffer.len()
    }

    fn delivery_time(&mut self) -> Instant {
        let now = Instant::now();
        let base = self.config.latency;
        if self.config.jitter == Duration::ZERO {
            return now + base;
        }
        let range = i64::try_from(self.config.jitter.as_nanos()).unwrap_or(i64::MAX);
        let offset = self.rng.gen_range_i64_inclusive(-range..=range);
        if offset >= 0 {
            now + base + Duration::from_nanos(offset.unsigned_abs())
        } else {
            now + base.saturating_sub(Duration::from_nanos(offset.unsigned_abs()))
        }
    }

    fn release_ready(&mut self) -> Vec<(String, Vec<u8>)> {
        let now = Instant::now();
        let mut ready = Vec::new();
        while self
            .in_flight
            .front()
            .is_some_and(|message| message.deliver_at <= now)
        {
            if let Some(message) = self.in_flight.pop_front() {
                ready.push((message.topic, message.payload));
            }
        }
        ready
    }

    fn reorder(&mut self, messages: &mut Vec<(String, Vec<u8>)>) {
        if self.config.reorder_buffer_size == 0 || self.config.reorder_rate <= 0.0 {
            return;
        }
        self.reorder_buffer.append(messages);
        if self.reorder_buffer.len() < self.config.reorder_buffer_size {
            return;
        }
        let len = self.reorder_buffer.len();
        for i in 0..len {
            if self.rng.gen_bool(self.config.reorder_rate) {
                let j = self.rng.gen_range_usize(0..len);
                if i != j {
                    self.reorder_buffer.swap(i, j);
                    self.stats.reordered += 1;
                }
            }
        }
        messages.append(&mut self.reorder_buffer);
    }
}

impl<B: BroadcastBus> BroadcastBus for ChaosBus<B> {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.stats.published += 1;
        if self.rng.gen_bool(self.config.publish_loss_rate) {
            self.stats.dropped_publish += 1;
            return;
        }
        self.inner.publish(topic, payload);
        if self.rng.gen_bool(self.config.duplication_rate) {
            self.stats.duplicated += 1;
            self.inner.publish(topic, payload);
        }
    }

    fn subscribe(&mut self, topic: &str) {
        self.inner.subscribe(topic);
    }

    fn unsubscribe(&mut self, topic: &str) {
        self.inner.unsubscribe(topic);
    }

    fn receive_all_messages(&mut self) -> Vec<(String, Vec<u8>)> {
        for (topic, payload) in self.inner.receive_all_messages() {
            if self.rng.gen_bool(self.config.receive_loss_rate) {
                self.stats.dropped_receive += 1;
                continue;
            }
            let deliver_at = self.delivery_time();
            self.in_flight.push_back(InFlight {
                topic,
                payload,
                deliver_at,
            });
        }
        if self.config.jitter > Duration::ZERO {
            self.in_flight
                .make_contiguous()
                .sort_by_key(|message| message.deliver_at);
        }

        let mut ready = self.release_ready();
        self.reorder(&mut ready);
        self.stats.received += ready.len() as u64;
        ready
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
    use crate::{MemoryBroker, MemoryBusEndpoint};

    fn pair(
        config: ChaosConfig,
    ) -> (ChaosBus<MemoryBusEndpoint>, MemoryBusEndpoint, MemoryBroker) {
        let broker = MemoryBroker::new();
        let sender = ChaosBus::new(broker.endpoint(), config);
        let mut receiver = broker.endpoint();
        receiver.subscribe("t");
        (sender, receiver, broker)
    }

    #[test]
    fn passthrough_delivers_everything_in_order() {
        let (mut sender, mut receiver, _broker) = pair(ChaosConfig::passthrough());
        for i in 0..5u8 {
            sender.publish("t", &[i]);
        }
        let got: Vec<u8> = receiver
            .receive_all_messages()
            .into_iter()
            .map(|(_, p)| p[0])
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(sender.stats().published, 5);
        assert_eq!(sender.stats().dropped_publish, 0);
    }

    #[test]
    fn full_publish_loss_drops_everything() {
        let config = ChaosConfig::builder().publish_loss_rate(1.0).seed(1).build();
        let (mut sender, mut receiver, broker) = pair(config);
        for _ in 0..10 {
            sender.publish("t", &[0]);
        }
        assert!(receiver.receive_all_messages().is_empty());
        assert_eq!(sender.stats().dropped_publish, 10);
        assert_eq!(broker.published(), 0);
    }

    #[test]
    fn full_duplication_doubles_messages() {
        let config = ChaosConfig::builder().duplication_rate(1.0).seed(1).build();
        let (mut sender, mut receiver, _broker) = pair(config);
        sender.publish("t", &[7]);
        assert_eq!(receiver.receive_all_messages().len(), 2);
        assert_eq!(sender.stats().duplicated, 1);
    }

    #[test]
    fn receive_side_loss_and_reordering_apply_to_wrapped_receiver() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let config = ChaosConfig::builder()
            .reorder_buffer_size(4)
            .reorder_rate(1.0)
            .seed(9)
            .build();
        let mut receiver = ChaosBus::new(broker.endpoint(), config);
        receiver.subscribe("t");

        for i in 0..3u8 {
            sender.publish("t", &[i]);
        }
        assert!(receiver.receive_all_messages().is_empty());
        assert_eq!(receiver.held_back(), 3);

        sender.publish("t", &[3]);
        let mut got: Vec<u8> = receiver
            .receive_all_messages()
            .into_iter()
            .map(|(_, p)| p[0])
            .collect();
        assert_eq!(got.len(), 4);
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn latency_holds_messages_back() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let config = ChaosConfig::builder()
            .latency(Duration::from_secs(3600))
            .seed(3)
            .build();
        let mut receiver = ChaosBus::new(broker.endpoint(), config);
        receiver.subscribe("t");
        sender.publish("t", &[1]);
        assert!(receiver.receive_all_messages().is_empty());
        assert_eq!(receiver.held_back(), 1);
    }

    #[test]
    fn same_seed_same_faults() {
        let run = || {
            let config = ChaosConfig::scrambled(77);
            let (mut sender, mut receiver, _broker) = pair(config);
            for i in 0..50u8 {
                sender.publish("t", &[i]);
            }
            receiver.receive_all_messages()
        };
        assert_eq!(run(), run());
    }
}
