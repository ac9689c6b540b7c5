//! Connection handlers for Junction server.
//!
//! This module runs the WebSocket accept loop, hands each connection to the
//! router, and serves the HTTP status endpoint.

use crate::config::Config;
use crate::metrics::{self, HandshakeMetricsGuard};
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use junction_core::Router as JunctionRouter;
use junction_transport::{Peer, Transport, WebSocketTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The session router.
    pub router: JunctionRouter,
}

/// Run the WAMP listener until interrupted, then close the router.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let router = JunctionRouter::new(config.router_config());

    for realm in &config.realms {
        router
            .add_realm(realm.clone())
            .await
            .with_context(|| format!("Failed to add realm {}", realm.uri))?;
    }
    metrics::set_active_realms(config.realms.len());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if config.http.enabled {
        let addr = config.http_addr()?;
        let state = Arc::new(AppState {
            router: router.clone(),
        });
        tokio::spawn(async move {
            if let Err(e) = serve_http(addr, state).await {
                error!("Status server failed: {}", e);
            }
        });
    }

    let transport = WebSocketTransport::new(config.websocket_config()?)
        .await
        .context("Failed to start WebSocket transport")?;

    info!(
        "WAMP endpoint: ws://{}:{} ({})",
        config.host,
        config.port,
        config.transport.serializers.join(", ")
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            accepted = transport.accept() => match accepted {
                Ok(peer) => {
                    tokio::spawn(handle_peer(router.clone(), peer));
                }
                Err(e) => {
                    warn!(transport = transport.name(), "Failed to accept connection: {}", e);
                    metrics::record_error("accept");
                }
            }
        }
    }

    router.close().await;
    metrics::set_active_realms(0);
    Ok(())
}

/// Run the session handshake for one connection.
async fn handle_peer(router: JunctionRouter, peer: Box<dyn Peer>) {
    let _metrics_guard = HandshakeMetricsGuard::new();
    let peer_id = peer.id().clone();
    let remote = peer.remote_addr().unwrap_or_default();

    debug!(peer = %peer_id, remote = %remote, "Connection accepted");

    match router.attach(peer).await {
        Ok(session) => {
            metrics::record_welcome();
            debug!(peer = %peer_id, session = session, "Session welcomed");
        }
        Err(e) => {
            metrics::record_abort(e.abort_reason());
            debug!(peer = %peer_id, remote = %remote, error = %e, "Handshake aborted");
        }
    }

    // Auto-created realms change the count.
    metrics::set_active_realms(router.stats().await.realms.len());
}

/// Serve `/health` and `/realms`.
async fn serve_http(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/realms", get(realms_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Status server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Realm listing handler.
async fn realms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.stats().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::{RealmConfig, RouterConfig};
    use junction_protocol::{Dict, Hello, Message};
    use junction_transport::linked_peers;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_peer_welcomes() {
        let router = JunctionRouter::new(RouterConfig::default());
        router.add_realm(RealmConfig::new("realm1")).await.unwrap();

        let (server, client) = linked_peers(4);
        let details: Dict = json!({"roles": {"caller": {}}})
            .as_object()
            .cloned()
            .unwrap();
        client
            .send(Message::from(Hello::new("realm1", details)))
            .await
            .unwrap();

        handle_peer(router.clone(), Box::new(server)).await;
        assert!(matches!(client.recv().await.unwrap(), Some(Message::Welcome(_))));
    }

    #[tokio::test]
    async fn test_realms_handler() {
        let router = JunctionRouter::new(RouterConfig::default());
        router.add_realm(RealmConfig::new("realm1")).await.unwrap();
        let state = Arc::new(AppState { router });

        let response = realms_handler(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
