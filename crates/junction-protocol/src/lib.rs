//! # junction-protocol
//!
//! Wire protocol definitions for the Junction WAMP router.
//!
//! This crate defines the session-level messages exchanged between clients
//! and the router, the URIs and IDs they carry, and the JSON / MessagePack
//! serializers used on the wire.
//!
//! ## Message Types
//!
//! - `Hello` / `Welcome` / `Abort` - Opening handshake
//! - `Challenge` / `Authenticate` - Authentication exchange
//! - `Goodbye` - Session close
//!
//! ## Example
//!
//! ```rust
//! use junction_protocol::{codec, Dict, Hello, Message, Serialization};
//!
//! let hello = Message::from(Hello::new("com.example.realm", Dict::new()));
//!
//! let encoded = codec::encode(&hello, Serialization::Json).unwrap();
//! let decoded = codec::decode(&encoded, Serialization::Json).unwrap();
//! assert_eq!(hello, decoded);
//! ```

pub mod codec;
pub mod id;
pub mod message;
pub mod uri;

pub use codec::{decode, encode, MessageCodec, ProtocolError, Serialization};
pub use id::{next_global_id, Id, MAX_ID};
pub use message::{
    dict_value, Abort, Authenticate, Challenge, Dict, Goodbye, Hello, Message, MessageType,
    Welcome,
};
pub use uri::{validate_uri, Uri};
