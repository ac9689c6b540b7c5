//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! The serializer is negotiated through the `Sec-WebSocket-Protocol` header
//! (`wamp.2.json` or `wamp.2.msgpack`) and every WebSocket message carries
//! exactly one WAMP message.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use junction_protocol::{Message, MessageCodec, Serialization};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as WsConfig;
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Peer, PeerId, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Serializations offered to clients.
    pub serializations: Vec<Serialization>,
    /// Time a connection has to complete the upgrade.
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
            serializations: Serialization::ALL.to_vec(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Upgraded connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 64;

type Accepted = Result<Box<dyn Peer>, TransportError>;

/// WebSocket transport.
///
/// A background task accepts TCP connections and upgrades each one on its
/// own task, so a client that stalls mid-upgrade does not hold up others.
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    incoming: Mutex<mpsc::Receiver<Accepted>>,
    acceptor: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", local_addr);

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, Arc::new(config), tx));

        Ok(Self {
            local_addr,
            incoming: Mutex::new(rx),
            acceptor,
        })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<WebSocketConfig>,
    tx: mpsc::Sender<Accepted>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = tx.closed() => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!("Accepted TCP connection from {}", addr);
                let config = config.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let upgraded =
                        timeout(config.handshake_timeout, upgrade(stream, addr, &config)).await;
                    match upgraded {
                        Ok(Ok(peer)) => {
                            let peer: Box<dyn Peer> = Box::new(peer);
                            let _ = tx.send(Ok(peer)).await;
                        }
                        Ok(Err(e)) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                        Err(_) => warn!("WebSocket handshake with {} timed out", addr),
                    }
                });
            }
            Err(e) => {
                if tx.send(Err(TransportError::Io(e))).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn ws_config(config: &WebSocketConfig) -> WsConfig {
    let mut ws_config = WsConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

/// Pick the first subprotocol the client offered that we also accept.
fn negotiate(request: &Request, accepted: &[Serialization]) -> Option<Serialization> {
    request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(Serialization::from_subprotocol)
        .find(|s| accepted.contains(s))
}

/// Run the server side of the WebSocket upgrade.
async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    config: &WebSocketConfig,
) -> Result<WebSocketPeer<TcpStream>, TransportError> {
    let mut chosen = None;
    let callback = |request: &Request, mut response: Response| {
        match negotiate(request, &config.serializations) {
            Some(serialization) => {
                response.headers_mut().insert(
                    SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(serialization.subprotocol()),
                );
                chosen = Some(serialization);
                Ok(response)
            }
            None => {
                let mut rejection =
                    ErrorResponse::new(Some("no supported WAMP subprotocol".to_string()));
                *rejection.status_mut() = StatusCode::BAD_REQUEST;
                Err(rejection)
            }
        }
    };

    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config(config)))
        .await
        .map_err(|e| TransportError::Other(format!("WebSocket handshake failed: {}", e)))?;
    let serialization = chosen.ok_or(TransportError::NoSubprotocol)?;

    debug!(%addr, %serialization, "WebSocket handshake completed");

    Ok(WebSocketPeer::new(ws_stream, serialization, Some(addr.to_string())))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Peer>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming
            .recv()
            .await
            .unwrap_or(Err(TransportError::ConnectionClosed))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A WebSocket connection carrying WAMP messages.
pub struct WebSocketPeer<S> {
    id: PeerId,
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    codec: MessageCodec,
    remote_addr: Option<String>,
    is_open: AtomicBool,
}

impl<S> WebSocketPeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket stream.
    #[must_use]
    pub fn new(
        stream: WebSocketStream<S>,
        serialization: Serialization,
        remote_addr: Option<String>,
    ) -> Self {
        let (sink, stream) = stream.split();
        Self {
            id: PeerId::generate(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            codec: MessageCodec::new(serialization),
            remote_addr,
            is_open: AtomicBool::new(true),
        }
    }

    /// The negotiated serialization.
    #[must_use]
    pub fn serialization(&self) -> Serialization {
        self.codec.serialization()
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S> Peer for WebSocketPeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let data = self.codec.encode(&message)?;
        let frame = if self.codec.serialization().is_binary() {
            WsMessage::Binary(data.to_vec())
        } else {
            let text = String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            WsMessage::Text(text)
        };

        let mut sink = self.sink.lock().await;
        sink.send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Message>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(Some(self.codec.decode(&data)?));
                }
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Some(self.codec.decode(text.as_bytes())?));
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let mut sink = self.sink.lock().await;
                    if let Err(e) = sink.send(WsMessage::Pong(data)).await {
                        warn!(peer = %self.id, "Failed to send pong: {}", e);
                    }
                }
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) => {
                    debug!(peer = %self.id, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!(peer = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(peer = %self.id, "WebSocket error: {}", e);
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Open a client connection to a WAMP router.
///
/// # Errors
///
/// Returns an error if the connection fails or the router does not accept
/// the requested serialization.
pub async fn connect(
    url: &str,
    serialization: Serialization,
) -> Result<WebSocketPeer<MaybeTlsStream<TcpStream>>, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Other(format!("Invalid URL {}: {}", url, e)))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(serialization.subprotocol()),
    );

    let (ws_stream, response) = connect_async(request)
        .await
        .map_err(|e| TransportError::Other(format!("WebSocket connect failed: {}", e)))?;

    let accepted = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(Serialization::from_subprotocol);
    if accepted != Some(serialization) {
        return Err(TransportError::NoSubprotocol);
    }

    Ok(WebSocketPeer::new(ws_stream, serialization, Some(url.to_string())))
}
