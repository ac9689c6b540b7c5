//! Serializers for WAMP messages.
//!
//! Two serializations are supported, selected per connection through the
//! WebSocket subprotocol: JSON (`wamp.2.json`, text frames) and MessagePack
//! (`wamp.2.msgpack`, binary frames). Each transport frame carries exactly one
//! message, so no length prefix is used.

use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::message::Message;

/// Maximum encoded message size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The message type code is not one this router understands.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    /// Invalid message structure.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Wire serialization negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Serialization {
    /// JSON text.
    #[default]
    Json,
    /// MessagePack binary.
    MsgPack,
}

impl Serialization {
    /// All serializations, in server preference order.
    pub const ALL: [Serialization; 2] = [Serialization::Json, Serialization::MsgPack];

    /// WebSocket subprotocol name.
    #[must_use]
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Serialization::Json => "wamp.2.json",
            Serialization::MsgPack => "wamp.2.msgpack",
        }
    }

    /// Look up a serialization by WebSocket subprotocol name.
    #[must_use]
    pub fn from_subprotocol(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.subprotocol() == name.trim())
    }

    /// Whether messages travel in binary frames.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Serialization::MsgPack)
    }
}

impl fmt::Display for Serialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Serialization::Json => "json",
            Serialization::MsgPack => "msgpack",
        })
    }
}

/// Encode a message.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(message: &Message, serialization: Serialization) -> Result<Bytes, ProtocolError> {
    let value = message.to_value();
    let payload = match serialization {
        Serialization::Json => serde_json::to_vec(&value)?,
        Serialization::MsgPack => rmp_serde::to_vec(&value)?,
    };

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode a message.
///
/// # Errors
///
/// Returns an error if the data is too large, cannot be parsed, or does not
/// describe a valid message.
pub fn decode(data: &[u8], serialization: Serialization) -> Result<Message, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    let value: Value = match serialization {
        Serialization::Json => serde_json::from_slice(data)?,
        Serialization::MsgPack => rmp_serde::from_slice(data)?,
    };
    Message::from_value(value)
}

/// Codec bound to one serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    serialization: Serialization,
}

impl MessageCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new(serialization: Serialization) -> Self {
        Self { serialization }
    }

    /// The serialization this codec uses.
    #[must_use]
    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    /// Encode a message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        encode(message, self.serialization)
    }

    /// Decode a message.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        decode(data, self.serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Dict, Goodbye, Hello, Welcome};
    use serde_json::json;

    fn hello() -> Message {
        let Value::Object(details) = json!({"roles": {"publisher": {}, "subscriber": {}}}) else {
            unreachable!()
        };
        Message::from(Hello::new("com.example.realm", details))
    }

    #[test]
    fn test_json_is_array_text() {
        let encoded = encode(&hello(), Serialization::Json).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("[1,\"com.example.realm\","));
        assert_eq!(decode(&encoded, Serialization::Json).unwrap(), hello());
    }

    #[test]
    fn test_msgpack_keeps_large_ids() {
        let welcome = Message::from(Welcome {
            id: crate::id::MAX_ID,
            details: Dict::new(),
        });
        let codec = MessageCodec::new(Serialization::MsgPack);
        let decoded = codec.decode(&codec.encode(&welcome).unwrap()).unwrap();
        assert_eq!(decoded, welcome);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(b"not json", Serialization::Json),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode(b"[42, {}]", Serialization::Json),
            Err(ProtocolError::UnknownMessageType(42))
        ));
        assert!(decode(&[0xc1], Serialization::MsgPack).is_err());
    }

    #[test]
    fn test_message_too_large() {
        let mut goodbye = Goodbye::new(crate::uri::CLOSE_REALM);
        goodbye
            .details
            .insert("message".into(), Value::String("x".repeat(MAX_MESSAGE_SIZE)));

        match encode(&Message::from(goodbye), Serialization::Json) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_subprotocol_lookup() {
        assert_eq!(
            Serialization::from_subprotocol("wamp.2.msgpack"),
            Some(Serialization::MsgPack)
        );
        assert_eq!(
            Serialization::from_subprotocol(" wamp.2.json"),
            Some(Serialization::Json)
        );
        assert_eq!(Serialization::from_subprotocol("wamp.2.cbor"), None);
        assert!(Serialization::MsgPack.is_binary());
    }
}
