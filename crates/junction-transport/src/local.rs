//! In-process peers.
//!
//! [`linked_peers`] returns two peers joined back to back by bounded queues.
//! Embedded clients use them to talk to a router living in the same process,
//! and tests use them to drive the handshake without a network.

use async_trait::async_trait;
use junction_protocol::Message;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Peer, PeerId, TransportError};

/// Default queue capacity for each direction.
pub const DEFAULT_LINK_CAPACITY: usize = 16;

/// One end of an in-process link.
#[derive(Debug)]
pub struct LocalPeer {
    id: PeerId,
    /// Queue towards the other end; `None` once this end is closed.
    outgoing: Mutex<Option<mpsc::Sender<Message>>>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

/// Create two linked peers.
///
/// Messages sent on one are received on the other. Closing either end makes
/// the opposite end's `recv` return `Ok(None)` once queued messages drain.
#[must_use]
pub fn linked_peers(capacity: usize) -> (LocalPeer, LocalPeer) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    let a = LocalPeer {
        id: PeerId::generate(),
        outgoing: Mutex::new(Some(b_tx)),
        incoming: tokio::sync::Mutex::new(a_rx),
    };
    let b = LocalPeer {
        id: PeerId::generate(),
        outgoing: Mutex::new(Some(a_tx)),
        incoming: tokio::sync::Mutex::new(b_rx),
    };
    (a, b)
}

impl LocalPeer {
    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check whether this end is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender().is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl Peer for LocalPeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let tx = self.sender().ok_or(TransportError::ConnectionClosed)?;
        trace!(peer = %self.id, message_type = %message.message_type(), "local send");
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        let mut rx = self.incoming.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let previous = self
            .outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            trace!(peer = %self.id, "local peer closed");
        }
        Ok(())
    }
}
