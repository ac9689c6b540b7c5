//! Message types for the WAMP session handshake.
//!
//! Every message travels as an array whose first element is the message
//! type code. The typed records here convert to and from that array form;
//! the serializers in [`codec`](crate::codec) only see `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::codec::ProtocolError;
use crate::id::Id;
use crate::uri::Uri;

/// An open-ended key/value record (`details`, `extra`).
pub type Dict = serde_json::Map<String, Value>;

/// Look up a nested value by key path.
///
/// Returns `None` if any intermediate value is missing or is not an object.
#[must_use]
pub fn dict_value<'a>(dict: &'a Dict, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = dict;
    for key in parents {
        current = current.get(*key)?.as_object()?;
    }
    current.get(*last)
}

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    Welcome = 2,
    Abort = 3,
    Challenge = 4,
    Authenticate = 5,
    Goodbye = 6,
}

impl From<MessageType> for u8 {
    fn from(mt: MessageType) -> u8 {
        mt as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Hello),
            2 => Ok(MessageType::Welcome),
            3 => Ok(MessageType::Abort),
            4 => Ok(MessageType::Challenge),
            5 => Ok(MessageType::Authenticate),
            6 => Ok(MessageType::Goodbye),
            _ => Err("Invalid message type"),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Hello => "HELLO",
            MessageType::Welcome => "WELCOME",
            MessageType::Abort => "ABORT",
            MessageType::Challenge => "CHALLENGE",
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Goodbye => "GOODBYE",
        };
        f.write_str(name)
    }
}

/// `[HELLO, Realm|uri, Details|dict]`
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    /// Realm the client wants to join.
    pub realm: Uri,
    /// Announced roles, auth methods and auth id.
    pub details: Dict,
}

impl Hello {
    /// Create a new HELLO message.
    #[must_use]
    pub fn new(realm: impl Into<Uri>, details: Dict) -> Self {
        Self {
            realm: realm.into(),
            details,
        }
    }
}

/// `[WELCOME, Session|id, Details|dict]`
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    /// Session ID assigned by the router.
    pub id: Id,
    /// Router roles and the negotiated authentication result.
    pub details: Dict,
}

/// `[ABORT, Details|dict, Reason|uri]`
#[derive(Debug, Clone, PartialEq)]
pub struct Abort {
    /// Optional extra information, e.g. `{"error": "..."}`.
    pub details: Dict,
    /// Why the handshake was aborted.
    pub reason: Uri,
}

impl Abort {
    /// Create an ABORT with empty details.
    #[must_use]
    pub fn new(reason: impl Into<Uri>) -> Self {
        Self {
            details: Dict::new(),
            reason: reason.into(),
        }
    }

    /// Attach a human-readable error to the details.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details
            .insert("error".to_string(), Value::String(error.into()));
        self
    }
}

/// `[CHALLENGE, AuthMethod|string, Extra|dict]`
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    /// Method the challenge belongs to.
    pub auth_method: String,
    /// Method-specific challenge data.
    pub extra: Dict,
}

/// `[AUTHENTICATE, Signature|string, Extra|dict]`
#[derive(Debug, Clone, PartialEq)]
pub struct Authenticate {
    /// The client's answer to a challenge.
    pub signature: String,
    /// Method-specific data.
    pub extra: Dict,
}

/// `[GOODBYE, Details|dict, Reason|uri]`
#[derive(Debug, Clone, PartialEq)]
pub struct Goodbye {
    /// Optional extra information.
    pub details: Dict,
    /// Why the session is closing.
    pub reason: Uri,
}

impl Goodbye {
    /// Create a GOODBYE with empty details.
    #[must_use]
    pub fn new(reason: impl Into<Uri>) -> Self {
        Self {
            details: Dict::new(),
            reason: reason.into(),
        }
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub enum Message {
    Hello(Hello),
    Welcome(Welcome),
    Abort(Abort),
    Challenge(Challenge),
    Authenticate(Authenticate),
    Goodbye(Goodbye),
}

impl Message {
    /// Get the message type.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::Welcome(_) => MessageType::Welcome,
            Message::Abort(_) => MessageType::Abort,
            Message::Challenge(_) => MessageType::Challenge,
            Message::Authenticate(_) => MessageType::Authenticate,
            Message::Goodbye(_) => MessageType::Goodbye,
        }
    }

    /// Build the array form of this message.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.clone().into()
    }

    /// Parse a message from its array form.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an array, has an unknown type
    /// code, or has missing, extra or mistyped elements.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        Self::try_from(value)
    }
}

macro_rules! impl_from_record {
    ($($record:ident),*) => {
        $(
            impl From<$record> for Message {
                fn from(msg: $record) -> Self {
                    Message::$record(msg)
                }
            }
        )*
    };
}

impl_from_record!(Hello, Welcome, Abort, Challenge, Authenticate, Goodbye);

impl From<Message> for Value {
    fn from(msg: Message) -> Value {
        let code = Value::from(u8::from(msg.message_type()));
        let items = match msg {
            Message::Hello(m) => vec![code, Value::String(m.realm.to_string()), Value::Object(m.details)],
            Message::Welcome(m) => vec![code, Value::from(m.id), Value::Object(m.details)],
            Message::Abort(m) => vec![code, Value::Object(m.details), Value::String(m.reason.to_string())],
            Message::Challenge(m) => vec![code, Value::String(m.auth_method), Value::Object(m.extra)],
            Message::Authenticate(m) => vec![code, Value::String(m.signature), Value::Object(m.extra)],
            Message::Goodbye(m) => vec![code, Value::Object(m.details), Value::String(m.reason.to_string())],
        };
        Value::Array(items)
    }
}

impl TryFrom<Value> for Message {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Array(items) = value else {
            return Err(ProtocolError::Invalid("message is not an array".into()));
        };
        let mut items = items.into_iter();
        let code = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ProtocolError::Invalid("missing message type code".into()))?;
        let kind = u8::try_from(code)
            .ok()
            .and_then(|c| MessageType::try_from(c).ok())
            .ok_or(ProtocolError::UnknownMessageType(code))?;

        let mut fields = Fields { kind, items };
        let msg = match kind {
            MessageType::Hello => Message::Hello(Hello {
                realm: fields.uri("Realm")?,
                details: fields.dict("Details")?,
            }),
            MessageType::Welcome => Message::Welcome(Welcome {
                id: fields.id("Session")?,
                details: fields.dict("Details")?,
            }),
            MessageType::Abort => Message::Abort(Abort {
                details: fields.dict("Details")?,
                reason: fields.uri("Reason")?,
            }),
            MessageType::Challenge => Message::Challenge(Challenge {
                auth_method: fields.string("AuthMethod")?,
                extra: fields.dict("Extra")?,
            }),
            MessageType::Authenticate => Message::Authenticate(Authenticate {
                signature: fields.string("Signature")?,
                extra: fields.dict("Extra")?,
            }),
            MessageType::Goodbye => Message::Goodbye(Goodbye {
                details: fields.dict("Details")?,
                reason: fields.uri("Reason")?,
            }),
        };
        fields.finish()?;
        Ok(msg)
    }
}

/// Cursor over the elements following the type code.
struct Fields {
    kind: MessageType,
    items: std::vec::IntoIter<Value>,
}

impl Fields {
    fn next(&mut self, name: &str) -> Result<Value, ProtocolError> {
        self.items
            .next()
            .ok_or_else(|| ProtocolError::Invalid(format!("{} is missing {}", self.kind, name)))
    }

    fn mistyped(&self, name: &str, expected: &str) -> ProtocolError {
        ProtocolError::Invalid(format!("{} {} must be {}", self.kind, name, expected))
    }

    fn string(&mut self, name: &str) -> Result<String, ProtocolError> {
        match self.next(name)? {
            Value::String(s) => Ok(s),
            _ => Err(self.mistyped(name, "a string")),
        }
    }

    fn uri(&mut self, name: &str) -> Result<Uri, ProtocolError> {
        self.string(name).map(Uri::from)
    }

    fn id(&mut self, name: &str) -> Result<Id, ProtocolError> {
        self.next(name)?
            .as_u64()
            .ok_or_else(|| self.mistyped(name, "an unsigned integer"))
    }

    fn dict(&mut self, name: &str) -> Result<Dict, ProtocolError> {
        match self.next(name)? {
            Value::Object(map) => Ok(map),
            _ => Err(self.mistyped(name, "a dict")),
        }
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.items.len() > 0 {
            return Err(ProtocolError::Invalid(format!(
                "{} has {} unexpected trailing elements",
                self.kind,
                self.items.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type() {
        let hello = Message::from(Hello::new("realm1", Dict::new()));
        assert_eq!(hello.message_type(), MessageType::Hello);
        assert_eq!(hello.message_type().to_string(), "HELLO");

        let goodbye = Message::from(Goodbye::new(crate::uri::GOODBYE_AND_OUT));
        assert_eq!(goodbye.message_type(), MessageType::Goodbye);
    }

    #[test]
    fn test_hello_array_form() {
        let value = json!([1, "com.example", {"roles": {"subscriber": {}}}]);
        let Message::Hello(hello) = Message::from_value(value.clone()).unwrap() else {
            panic!("expected HELLO");
        };
        assert_eq!(hello.realm, "com.example");
        assert!(dict_value(&hello.details, &["roles", "subscriber"]).is_some());
        assert_eq!(Message::Hello(hello).to_value(), value);
    }

    #[test]
    fn test_abort_places_details_before_reason() {
        let abort = Abort::new(crate::uri::NO_SUCH_REALM).with_error("no realm requested");
        assert_eq!(
            Message::from(abort).to_value(),
            json!([3, {"error": "no realm requested"}, "wamp.error.no_such_realm"])
        );
    }

    #[test]
    fn test_rejects_malformed_messages() {
        assert!(matches!(
            Message::from_value(json!({"type": 1})),
            Err(ProtocolError::Invalid(_))
        ));
        assert!(matches!(
            Message::from_value(json!([99, {}])),
            Err(ProtocolError::UnknownMessageType(99))
        ));
        // Missing details.
        assert!(Message::from_value(json!([1, "realm1"])).is_err());
        // Realm is not a string.
        assert!(Message::from_value(json!([1, 7, {}])).is_err());
        // Trailing element.
        assert!(Message::from_value(json!([6, {}, "wamp.close.close_realm", 1])).is_err());
        // Negative session id.
        assert!(Message::from_value(json!([2, -1, {}])).is_err());
    }

    #[test]
    fn test_dict_value_path() {
        let details = json!({"roles": {"caller": {"features": {"progressive_call_results": true}}}});
        let Value::Object(details) = details else { unreachable!() };

        assert_eq!(
            dict_value(&details, &["roles", "caller", "features", "progressive_call_results"]),
            Some(&Value::Bool(true))
        );
        assert!(dict_value(&details, &["roles", "callee"]).is_none());
        assert!(dict_value(&details, &[]).is_none());
    }
}
