//! # junction-transport
//!
//! Transport abstraction layer for the Junction WAMP router.
//!
//! The router core never touches sockets. It talks to a [`Peer`], which
//! exchanges whole protocol messages:
//!
//! - **Local** - In-process linked peers for embedded clients and tests
//! - **WebSocket** - `wamp.2.json` / `wamp.2.msgpack` over WebSocket
//!
//! ```rust,ignore
//! use junction_transport::{Peer, Transport};
//!
//! async fn serve(transport: impl Transport) {
//!     while let Ok(peer) = transport.accept().await {
//!         // Hand the peer to the router
//!     }
//! }
//! ```

pub mod local;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use local::{linked_peers, LocalPeer};
pub use traits::{Peer, PeerId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{connect, WebSocketConfig, WebSocketPeer, WebSocketTransport};
