//! Wire format of bus payloads.
//!
//! Every payload is a [`MessageHeader`] followed by the [`BusMessage`], encoded with bincode
//! using fixed-size integers so every client in a room produces the same bytes for the same
//! message.
//!
//! ```
//! use record_relay::network::codec::{decode_message, encode_message};
//! use record_relay::{BusMessage, ClientId, RecordId};
//!
//! let message = BusMessage::request(RecordId::from("r1"), ClientId::from("p1"));
//! let bytes = encode_message(&message).expect("encoding should succeed");
//! assert_eq!(decode_message(&bytes).expect("decoding should succeed"), message);
//! ```

use std::fmt;

use crate::network::messages::{BusMessage, MessageHeader, WireMessage, WIRE_MAGIC};

fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Why a payload could not be produced or read.
///
/// bincode errors only expose `Display`, so their text is kept as a `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// bincode refused to encode the message.
    Encode {
        /// bincode's description.
        message: String,
    },
    /// The payload is not a bincode-encoded message.
    Decode {
        /// bincode's description.
        message: String,
    },
    /// The payload decoded, but does not start with the relay's magic number.
    ForeignPayload {
        /// The magic number found.
        magic: u16,
    },
    /// The payload decoded, but bytes were left over.
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode { message } => write!(f, "could not encode bus message: {message}"),
            Self::Decode { message } => write!(f, "could not decode bus message: {message}"),
            Self::ForeignPayload { magic } => {
                write!(f, "payload magic {magic:#06x} does not belong to the relay")
            },
            Self::TrailingBytes { remaining } => {
                write!(f, "{remaining} bytes left over after the message")
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Encodes a bus message, header included.
pub fn encode_message(message: &BusMessage) -> Result<Vec<u8>, CodecError> {
    let wire = WireMessage {
        header: MessageHeader::default(),
        body: message.clone(),
    };
    bincode::serde::encode_to_vec(&wire, config()).map_err(|err| CodecError::Encode {
        message: err.to_string(),
    })
}

/// Decodes a bus message, rejecting foreign payloads and payloads with trailing bytes.
pub fn decode_message(bytes: &[u8]) -> Result<BusMessage, CodecError> {
    let (wire, read): (WireMessage, usize) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|err| CodecError::Decode {
            message: err.to_string(),
        })?;
    if wire.header.magic != WIRE_MAGIC {
        return Err(CodecError::ForeignPayload {
            magic: wire.header.magic,
        });
    }
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes {
            remaining: bytes.len() - read,
        });
    }
    Ok(wire.body)
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
    use crate::{ClientId, FieldValue, Fields, RecordId};

    fn update() -> BusMessage {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::from("Kaya"));
        fields.insert("save_will".into(), FieldValue::from(true));
        BusMessage::update(RecordId::from("r1"), ClientId::from("p1"), fields)
    }

    #[test]
    fn message_survives_the_wire() {
        let original = update();
        let bytes = encode_message(&original).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), original);
    }

    #[test]
    fn payload_starts_with_magic() {
        let bytes = encode_message(&update()).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), WIRE_MAGIC);
    }

    #[test]
    fn foreign_magic_is_rejected() {
        let mut bytes = encode_message(&update()).unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            decode_message(&bytes),
            Err(CodecError::ForeignPayload { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_message(&update()).unwrap();
        bytes.push(0);
        assert_eq!(
            decode_message(&bytes),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_message(&[0xFF, 0xFF, 0xFF]),
            Err(CodecError::Decode { .. })
        ));
        assert!(decode_message(&[]).is_err());
    }

    #[test]
    fn codec_error_display() {
        let err = CodecError::Encode {
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "could not encode bus message: boom");
        let err = CodecError::ForeignPayload { magic: 0x1234 };
        assert!(err.to_string().contains("0x1234"));
    }
}
