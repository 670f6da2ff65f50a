//! Messages exchanged on the broadcast bus and the topics they travel on.

use serde::{Deserialize, Serialize};

use crate::{ClientId, Fields, RecordId};

/// Identifies every relay payload on the wire. Payloads with another magic are dropped.
pub(crate) const WIRE_MAGIC: u16 = 0x5252;

/// What a [`BusMessage`] asks for or carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A viewer asks the owner for a record's current fields.
    Request,
    /// The owner answers a request.
    Response,
    /// The owner pushes fields after saving, unprompted.
    Update,
}

impl MessageKind {
    /// Returns a string representation suitable for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the bus. Requests never carry fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// What the message is.
    pub kind: MessageKind,
    /// The record concerned.
    pub record_id: RecordId,
    /// For requests, the owner being addressed; otherwise the sender.
    pub owner_id: ClientId,
    /// The record's fields, for responses and updates.
    pub fields: Option<Fields>,
}

impl BusMessage {
    /// A request addressed to `owner_id`.
    #[must_use]
    pub fn request(record_id: RecordId, owner_id: ClientId) -> Self {
        Self {
            kind: MessageKind::Request,
            record_id,
            owner_id,
            fields: None,
        }
    }

    /// An answer to a request.
    #[must_use]
    pub fn response(record_id: RecordId, owner_id: ClientId, fields: Fields) -> Self {
        Self {
            kind: MessageKind::Response,
            record_id,
            owner_id,
            fields: Some(fields),
        }
    }

    /// A push after a save.
    #[must_use]
    pub fn update(record_id: RecordId, owner_id: ClientId, fields: Fields) -> Self {
        Self {
            kind: MessageKind::Update,
            record_id,
            owner_id,
            fields: Some(fields),
        }
    }

    /// Returns `true` if the message is about `record_id` owned by `owner_id`.
    #[must_use]
    pub fn concerns(&self, record_id: &RecordId, owner_id: &ClientId) -> bool {
        &self.record_id == record_id && &self.owner_id == owner_id
    }
}

/// The header preceding every message on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MessageHeader {
    pub magic: u16,
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self { magic: WIRE_MAGIC }
    }
}

/// A message as encoded on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub header: MessageHeader,
    pub body: BusMessage,
}

/// The two topics of a namespace.
///
/// ```
/// use record_relay::{MessageKind, Topics};
///
/// let topics = Topics::new("dsp");
/// assert_eq!(topics.request(), "dsp:req-record");
/// assert_eq!(topics.for_kind(MessageKind::Update), "dsp:push-record");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topics {
    request: String,
    push: String,
}

impl Topics {
    /// Derives the topic names for `namespace`.
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            request: format!("{namespace}:req-record"),
            push: format!("{namespace}:push-record"),
        }
    }

    /// Topic carrying requests.
    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Topic carrying responses and updates.
    #[must_use]
    pub fn push(&self) -> &str {
        &self.push
    }

    /// The topic a message of `kind` is published on.
    #[must_use]
    pub fn for_kind(&self, kind: MessageKind) -> &str {
        match kind {
            MessageKind::Request => &self.request,
            MessageKind::Response | MessageKind::Update => &self.push,
        }
    }

    /// Both topics.
    #[must_use]
    pub fn all(&self) -> [&str; 2] {
        [&self.request, &self.push]
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
    fn requests_carry_no_fields() {
        let request = BusMessage::request(RecordId::from("r1"), ClientId::from("p1"));
        assert_eq!(request.kind, MessageKind::Request);
        assert!(request.fields.is_none());

        let update = BusMessage::update(RecordId::from("r1"), ClientId::from("p1"), Fields::new());
        assert_eq!(update.fields, Some(Fields::new()));
    }

    #[test]
    fn concerns_compares_record_and_owner() {
        let msg = BusMessage::response(RecordId::from("r1"), ClientId::from("p1"), Fields::new());
        assert!(msg.concerns(&RecordId::from("r1"), &ClientId::from("p1")));
        assert!(!msg.concerns(&RecordId::from("r1"), &ClientId::from("p2")));
        assert!(!msg.concerns(&RecordId::from("r2"), &ClientId::from("p1")));
    }

    #[test]
    fn responses_and_updates_share_the_push_topic() {
        let topics = Topics::new("ns");
        assert_eq!(topics.for_kind(MessageKind::Request), "ns:req-record");
        assert_eq!(topics.for_kind(MessageKind::Response), topics.push());
        assert_eq!(topics.for_kind(MessageKind::Update), topics.push());
        assert_eq!(topics.all(), ["ns:req-record", "ns:push-record"]);
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(MessageKind::Request.to_string(), "request");
        assert_eq!(MessageKind::Update.as_str(), "update");
    }
}
