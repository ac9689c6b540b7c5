//! Transport abstraction traits for Junction.
//!
//! These traits define the interface the router needs from a connected
//! client, allowing the session core to be transport-agnostic.

use async_trait::async_trait;
use junction_protocol::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Counter for generating peer IDs.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a new peer ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique peer ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!(
            "peer_{:x}",
            NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Nothing arrived before the deadline.
    #[error("Timed out waiting for message")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The client offered no serializer this server accepts.
    #[error("No acceptable WebSocket subprotocol")]
    NoSubprotocol,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] junction_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can accept peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new peer.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Peer>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// The remote side of a connection, exchanging whole messages.
///
/// All methods take `&self`: implementations synchronize internally so that
/// one task can wait in [`recv`](Peer::recv) while another sends.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Get the peer's unique identifier.
    fn id(&self) -> &PeerId;

    /// Send a message to the peer.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Receive the next message from the peer.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&self) -> Result<Option<Message>, TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Receive the next message, giving up after `timeout`.
    ///
    /// A clean close is reported as [`TransportError::ConnectionClosed`].
    async fn recv_timeout(&self, timeout: Duration) -> Result<Message, TransportError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Ok(Some(message))) => Ok(message),
            Ok(Ok(None)) => Err(TransportError::ConnectionClosed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generation() {
        let id1 = PeerId::generate();
        let id2 = PeerId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("peer_"));
    }

    #[test]
    fn test_peer_id_from_string() {
        let id: PeerId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(id.to_string(), "test-id");
    }
}
