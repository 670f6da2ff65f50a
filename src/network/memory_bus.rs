//! An in-process broadcast room.
//!
//! [`MemoryBroker`] is the room; every client gets its own [`MemoryBusEndpoint`] from
//! [`MemoryBroker::endpoint`]. Delivery copies the payload into the inbox of every other
//! endpoint subscribed to the topic at publish time. Each sender's messages arrive in the
//! order they were published; nothing else is ordered. An inbox holds at most
//! [`DEFAULT_INBOX_CAPACITY`] messages unless the broker was created with another capacity;
//! once full, each new delivery evicts the oldest waiting message.
//!
//! ```
//! use record_relay::{BroadcastBus, MemoryBroker};
//!
//! let broker = MemoryBroker::new();
//! let mut alice = broker.endpoint();
//! let mut bob = broker.endpoint();
//! bob.subscribe("room:chat");
//!
//! alice.publish("room:chat", b"hi");
//! alice.publish("room:other", b"unheard");
//! assert_eq!(bob.receive_all_messages(), vec![("room:chat".to_owned(), b"hi".to_vec())]);
//! assert!(alice.receive_all_messages().is_empty());
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::BroadcastBus;

type EndpointId = usize;

/// Messages an endpoint's inbox holds before the oldest are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Room {
    next_endpoint: EndpointId,
    subscribers: BTreeMap<String, SmallVec<[EndpointId; 4]>>,
    inboxes: BTreeMap<EndpointId, VecDeque<(String, Vec<u8>)>>,
    inbox_capacity: usize,
    published: u64,
    delivered: u64,
    dropped: u64,
}

impl Default for Room {
    fn default() -> Self {
        Self {
            next_endpoint: 0,
            subscribers: BTreeMap::new(),
            inboxes: BTreeMap::new(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            published: 0,
            delivered: 0,
            dropped: 0,
        }
    }
}

impl Room {
    fn unsubscribe(&mut self, endpoint: EndpointId, topic: &str) {
        if let Some(list) = self.subscribers.get_mut(topic) {
            list.retain(|id| *id != endpoint);
            if list.is_empty() {
                self.subscribers.remove(topic);
            }
        }
    }
}

/// A broadcast room shared by the endpoints created from it. Clones are handles onto the
/// same room.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    room: Arc<Mutex<Room>>,
}

impl MemoryBroker {
    /// Creates an empty room.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty room whose inboxes hold at most `capacity` messages (at least one).
    #[must_use]
    pub fn with_inbox_capacity(capacity: usize) -> Self {
        let room = Room {
            inbox_capacity: capacity.max(1),
            ..Room::default()
        };
        Self {
            room: Arc::new(Mutex::new(room)),
        }
    }

    /// Joins the room with a new endpoint, subscribed to nothing.
    #[must_use]
    pub fn endpoint(&self) -> MemoryBusEndpoint {
        let mut room = self.room.lock();
        let id = room.next_endpoint;
        room.next_endpoint += 1;
        room.inboxes.insert(id, VecDeque::new());
        MemoryBusEndpoint {
            id,
            room: Arc::clone(&self.room),
        }
    }

    /// Number of endpoints currently subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.room
            .lock()
            .subscribers
            .get(topic)
            .map_or(0, SmallVec::len)
    }

    /// Total number of messages published in the room.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.room.lock().published
    }

    /// Total number of copies handed to inboxes.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.room.lock().delivered
    }

    /// Total number of copies evicted from full inboxes before being read.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.room.lock().dropped
    }
}

/// One client's connection to a [`MemoryBroker`]. Dropping it leaves the room.
#[derive(Debug)]
pub struct MemoryBusEndpoint {
    id: EndpointId,
    room: Arc<Mutex<Room>>,
}

impl MemoryBusEndpoint {
    /// Number of messages waiting in this endpoint's inbox.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.room.lock().inboxes.get(&self.id).map_or(0, VecDeque::len)
    }
}

impl BroadcastBus for MemoryBusEndpoint {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        let mut room = self.room.lock();
        room.published += 1;
        let targets: SmallVec<[EndpointId; 4]> = room
            .subscribers
            .get(topic)
            .map(|list| list.iter().copied().filter(|id| *id != self.id).collect())
            .unwrap_or_default();
        let capacity = room.inbox_capacity;
        let mut evicted = 0u64;
        for target in &targets {
            if let Some(inbox) = room.inboxes.get_mut(target) {
                if inbox.len() >= capacity {
                    inbox.pop_front();
                    evicted += 1;
                    debug!(endpoint = target, capacity, "inbox full, dropped oldest message");
                }
                inbox.push_back((topic.to_owned(), payload.to_vec()));
            }
        }
        room.delivered += targets.len() as u64;
        room.dropped += evicted;
        trace!(endpoint = self.id, topic, receivers = targets.len(), "published");
    }

    fn subscribe(&mut self, topic: &str) {
        let mut room = self.room.lock();
        let list = room.subscribers.entry(topic.to_owned()).or_default();
        if !list.contains(&self.id) {
            list.push(self.id);
        }
    }

    fn unsubscribe(&mut self, topic: &str) {
        self.room.lock().unsubscribe(self.id, topic);
    }

    fn receive_all_messages(&mut self) -> Vec<(String, Vec<u8>)> {
        self.room
            .lock()
            .inboxes
            .get_mut(&self.id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Drop for MemoryBusEndpoint {
    fn drop(&mut self) {
        let mut room = self.room.lock();
        let topics: Vec<String> = room.subscribers.keys().cloned().collect();
        for topic in topics {
            room.unsubscribe(self.id, &topic);
        }
        room.inboxes.remove(&self.id);
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

    #[test]
    fn only_subscribed_endpoints_receive() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let mut subscribed = broker.endpoint();
        let mut idle = broker.endpoint();
        subscribed.subscribe("t");

        sender.publish("t", &[1]);
        assert_eq!(subscribed.receive_all_messages().len(), 1);
        assert!(idle.receive_all_messages().is_empty());
        assert_eq!(broker.delivered(), 1);
    }

    #[test]
    fn publisher_does_not_hear_itself() {
        let broker = MemoryBroker::new();
        let mut endpoint = broker.endpoint();
        endpoint.subscribe("t");
        endpoint.publish("t", &[1]);
        assert!(endpoint.receive_all_messages().is_empty());
        assert_eq!(broker.published(), 1);
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let mut receiver = broker.endpoint();
        receiver.subscribe("t");
        for i in 0..10u8 {
            sender.publish("t", &[i]);
        }
        let payloads: Vec<u8> = receiver
            .receive_all_messages()
            .into_iter()
            .map(|(_, payload)| payload[0])
            .collect();
        assert_eq!(payloads, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn messages_published_before_subscribing_are_not_delivered() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let mut late = broker.endpoint();
        sender.publish("t", &[1]);
        late.subscribe("t");
        sender.publish("t", &[2]);
        assert_eq!(late.receive_all_messages(), vec![("t".to_owned(), vec![2])]);
    }

    #[test]
    fn unsubscribe_and_drop_leave_the_topic() {
        let broker = MemoryBroker::new();
        let mut a = broker.endpoint();
        let mut b = broker.endpoint();
        a.subscribe("t");
        a.subscribe("t");
        b.subscribe("t");
        assert_eq!(broker.subscriber_count("t"), 2);

        a.unsubscribe("t");
        assert_eq!(broker.subscriber_count("t"), 1);
        drop(b);
        assert_eq!(broker.subscriber_count("t"), 0);
    }

    #[test]
    fn full_inbox_drops_the_oldest_message() {
        let broker = MemoryBroker::with_inbox_capacity(3);
        let mut sender = broker.endpoint();
        let mut slow = broker.endpoint();
        let mut fast = broker.endpoint();
        slow.subscribe("t");
        fast.subscribe("t");

        for i in 0..5u8 {
            sender.publish("t", &[i]);
            assert_eq!(fast.receive_all_messages().len(), 1);
        }
        assert_eq!(slow.pending(), 3);
        let payloads: Vec<u8> = slow
            .receive_all_messages()
            .into_iter()
            .map(|(_, payload)| payload[0])
            .collect();
        assert_eq!(payloads, vec![2, 3, 4]);
        assert_eq!(broker.delivered(), 10);
        assert_eq!(broker.dropped(), 2);
    }

    #[test]
    fn default_inbox_capacity_applies() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let mut receiver = broker.endpoint();
        receiver.subscribe("t");
        for _ in 0..DEFAULT_INBOX_CAPACITY + 1 {
            sender.publish("t", &[0]);
        }
        assert_eq!(receiver.pending(), DEFAULT_INBOX_CAPACITY);
        assert_eq!(broker.dropped(), 1);
    }

    #[test]
    fn receive_drains_the_inbox() {
        let broker = MemoryBroker::new();
        let mut sender = broker.endpoint();
        let mut receiver = broker.endpoint();
        receiver.subscribe("t");
        sender.publish("t", &[1]);
        assert_eq!(receiver.pending(), 1);
        assert_eq!(receiver.receive_all_messages().len(), 1);
        assert_eq!(receiver.pending(), 0);
        assert!(receiver.receive_all_messages().is_empty());
    }
}
