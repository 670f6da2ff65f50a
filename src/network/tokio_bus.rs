//! Tokio adapter: a [`BroadcastBus`] over [`tokio::sync::broadcast`].
//!
//! Relay clients are poll-driven. Inside a Tokio application, give every client a
//! [`TokioBroadcastBus`] joined to one shared channel, await
//! [`wait_for_message`](TokioBroadcastBus::wait_for_message) to sleep until traffic arrives,
//! then call the client's `poll`.
//!
//! ```no_run
//! use record_relay::TokioBroadcastBus;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let gm_bus = TokioBroadcastBus::channel(256);
//!     let player_bus = gm_bus.join();
//!     # drop(player_bus);
//!     // let mut gm = RelayBuilder::new().start(identity, private, shared, gm_bus)?;
//!     // loop {
//!     //     gm_bus.wait_for_message().await;
//!     //     gm.poll();
//!     // }
//! }
//! ```
//!
//! # Feature Flag
//!
//! This module requires the `tokio` feature flag:
//!
//! ```toml
//! [dependencies]
//! record-relay = { version = "0.3", features = ["tokio"] }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::BroadcastBus;

#[derive(Debug, Clone)]
struct Envelope {
    sender: u64,
    sequence: u64,
    topic: Arc<str>,
    payload: Arc<[u8]>,
}

/// A [`BroadcastBus`] endpoint on a shared tokio broadcast channel.
///
/// Every endpoint sees every message on the channel and keeps those whose topic it is
/// subscribed to. Messages carry a channel-wide sequence number, and a subscription only
/// admits messages published after it was made, even if they are read later. A reader that falls more than the channel capacity
/// behind loses the oldest messages; the loss is reported to the violation observer.
pub struct TokioBroadcastBus {
    id: u64,
    next_id: Arc<AtomicU64>,
    next_sequence: Arc<AtomicU64>,
    sender: broadcast::Sender<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
    /// Subscribed topics and the first sequence number each admits.
    topics: BTreeMap<String, u64>,
    pending: Vec<(String, Vec<u8>)>,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for TokioBroadcastBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioBroadcastBus")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("pending", &self.pending.len())
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl TokioBroadcastBus {
    /// Creates a channel holding up to `capacity` unread messages per endpoint and returns
    /// its first endpoint. Further endpoints come from [`join`](Self::join).
    #[must_use]
    pub fn channel(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            id: 0,
            next_id: Arc::new(AtomicU64::new(1)),
            next_sequence: Arc::new(AtomicU64::new(0)),
            sender,
            receiver,
            topics: BTreeMap::new(),
            pending: Vec::new(),
            observer: None,
        }
    }

    /// Creates another endpoint on the same channel, subscribed to nothing.
    #[must_use]
    pub fn join(&self) -> Self {
        Self {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            next_id: Arc::clone(&self.next_id),
            next_sequence: Arc::clone(&self.next_sequence),
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
            topics: BTreeMap::new(),
            pending: Vec::new(),
            observer: self.observer.clone(),
        }
    }

    /// Reports channel lag to `observer` instead of the default tracing observer.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Waits until a message for a subscribed topic is available. The message is kept for
    /// the next [`receive_all_messages`](BroadcastBus::receive_all_messages).
    ///
    /// Returns immediately if messages are already pending, and never returns once every
    /// other endpoint is gone and the channel is drained.
    pub async fn wait_for_message(&mut self) {
        while self.pending.is_empty() {
            match self.receiver.recv().await {
                Ok(envelope) => self.accept(envelope),
                Err(RecvError::Lagged(skipped)) => self.report_lag(skipped),
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }

    fn accept(&mut self, envelope: Envelope) {
        let admitted = self
            .topics
            .get(&*envelope.topic)
            .is_some_and(|since| envelope.sequence >= *since);
        if envelope.sender != self.id && admitted {
            self.pending
                .push((envelope.topic.to_string(), envelope.payload.to_vec()));
        }
    }

    fn report_lag(&self, skipped: u64) {
        report_violation!(
            &self.observer,
            ViolationSeverity::Warning,
            ViolationKind::Broadcast,
            None,
            "endpoint {} fell behind and lost {} messages",
            self.id,
            skipped
        );
    }
}

impl BroadcastBus for TokioBroadcastBus {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        let envelope = Envelope {
            sender: self.id,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            topic: Arc::from(topic),
            payload: Arc::from(payload),
        };
        // an error only means nobody is listening
        let _ = self.sender.send(envelope);
    }

    fn subscribe(&mut self, topic: &str) {
        let since = self.next_sequence.load(Ordering::SeqCst);
        self.topics.entry(topic.to_owned()).or_insert(since);
    }

    fn unsubscribe(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    fn receive_all_messages(&mut self) -> Vec<(String, Vec<u8>)> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => self.accept(envelope),
                Err(TryRecvError::Lagged(skipped)) => self.report_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        std::mem::take(&mut self.pending)
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

    #[test]
    fn delivers_to_subscribed_peers_only() {
        let mut a = TokioBroadcastBus::channel(16);
        let mut b = a.join();
        let mut c = a.join();
        b.subscribe("t");
        a.subscribe("t");

        a.publish("t", b"x");
        assert_eq!(b.receive_all_messages(), vec![("t".to_owned(), b"x".to_vec())]);
        assert!(c.receive_all_messages().is_empty());
        assert!(a.receive_all_messages().is_empty());
    }

    #[test]
    fn messages_published_before_subscribing_are_not_delivered() {
        let mut a = TokioBroadcastBus::channel(16);
        let mut b = a.join();
        a.publish("t", b"early");
        b.subscribe("t");
        a.publish("t", b"late");
        assert_eq!(b.receive_all_messages(), vec![("t".to_owned(), b"late".to_vec())]);

        // subscribing again keeps the original starting point
        a.publish("t", b"again");
        b.subscribe("t");
        assert_eq!(b.receive_all_messages(), vec![("t".to_owned(), b"again".to_vec())]);

        b.unsubscribe("t");
        a.publish("t", b"gone");
        b.subscribe("t");
        assert!(b.receive_all_messages().is_empty());
    }

    #[test]
    fn lag_is_reported() {
        let collector = Arc::new(CollectingObserver::new());
        let mut a = TokioBroadcastBus::channel(2);
        let mut b = a.join().with_violation_observer(collector.clone());
        b.subscribe("t");
        for i in 0..5u8 {
            a.publish("t", &[i]);
        }
        let received = b.receive_all_messages();
        assert_eq!(received.len(), 2);
        assert!(collector.has_violation(ViolationKind::Broadcast));
    }

    #[tokio::test]
    async fn wait_for_message_wakes_on_traffic() {
        let mut a = TokioBroadcastBus::channel(16);
        let mut b = a.join();
        b.subscribe("t");
        a.publish("other", b"ignored");
        a.publish("t", b"y");
        b.wait_for_message().await;
        assert_eq!(b.receive_all_messages(), vec![("t".to_owned(), b"y".to_vec())]);
    }
}
