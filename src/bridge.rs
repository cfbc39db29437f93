//! HTTP surface and process lifecycle for the bridge.

use crate::error::{BridgeError, Result};
use crate::registry::SessionRegistry;
use crate::request_handler;
use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

/// Configuration for the bridge server, supplied once at startup and
/// immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Local address to bind the HTTP server to. Port 0 picks a random port.
    pub bind_addr: SocketAddr,

    /// Event-stream URL of the remote peer every session connects to.
    pub remote_url: Url,
}

/// Shared state behind every handler.
pub struct BridgeState {
    pub registry: SessionRegistry,
    pub remote_url: Url,
}

impl BridgeState {
    /// Fresh state with an empty registry.
    pub fn new(remote_url: Url) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            remote_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TimeoutQuery {
    /// Kept raw so a non-integer value yields the bridge's own rejection
    /// instead of an extractor error.
    timeout: Option<String>,
}

/// Build the bridge router.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sse", get(handshake_entry).post(handshake_entry))
        .route("/sse/messages", get(handshake_entry).post(handshake_entry))
        .route("/sse/messages/{session_id}", post(sync_messages))
        .route("/raw/sse", get(legacy_read))
        .route("/raw/messages", post(legacy_write))
        .with_state(state)
}

/// Start the bridge and block until shutdown. On ctrl-c the server drains
/// in-flight requests, then every still-open remote connection is closed
/// best-effort.
pub async fn start_bridge(config: BridgeConfig) -> Result<()> {
    let state = BridgeState::new(config.remote_url);
    let app = router(state.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Failed to bind: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::HttpServer(format!("Failed to get local addr: {e}")))?;

    info!("HTTP bridge listening on http://{local_addr}");
    info!("Remote event stream: {}", state.remote_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Server error: {e}")))?;

    info!(
        sessions = state.registry.len(),
        "Shutting down, closing remote connections"
    );
    state.registry.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Received shutdown signal");
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// `GET|POST /sse` and `GET|POST /sse/messages`: no session id in the path,
/// so every call lands in the handshake branch and is taught a fresh id.
async fn handshake_entry(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<TimeoutQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    request_handler::handle_sync_messages(state, None, query.timeout, headers, body).await
}

/// `POST /sse/messages/{session_id}`: the core forward-and-await flow.
async fn sync_messages(
    State(state): State<Arc<BridgeState>>,
    Path(session_id): Path<String>,
    Query(query): Query<TimeoutQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    request_handler::handle_sync_messages(state, Some(session_id), query.timeout, headers, body)
        .await
}

async fn legacy_read(State(state): State<Arc<BridgeState>>, headers: HeaderMap) -> Response {
    request_handler::handle_legacy_read(state, headers).await
}

async fn legacy_write(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    request_handler::handle_legacy_write(state, headers, body).await
}
