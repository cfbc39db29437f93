//! In-process mock of the remote event-stream peer.
//!
//! Speaks the same protocol the bridge expects: `GET /sse` opens a push
//! stream whose first event announces the message endpoint, and messages
//! POSTed to that endpoint are answered (or swallowed) on the stream.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
};
use dashmap::DashMap;
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// How the mock answers forwarded messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Reply to every posted message with a JSON-RPC result echoing its id
    /// and method.
    Echo,
    /// Accept messages but never reply, so every wait times out.
    Silent,
    /// Reply with a `message` event whose data is not JSON at all.
    Garbled,
}

struct MockRemoteState {
    mode: ReplyMode,
    streams: DashMap<String, mpsc::Sender<String>>,
    connects: AtomicUsize,
    forwarded: AtomicUsize,
}

pub struct MockRemote {
    pub addr: SocketAddr,
    state: Arc<MockRemoteState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockRemote {
    pub fn stream_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/sse", self.addr)).unwrap()
    }

    /// How many times a bridge connection opened the stream.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// How many messages were POSTed to the announced endpoint.
    pub fn forwarded_count(&self) -> usize {
        self.state.forwarded.load(Ordering::SeqCst)
    }

    /// Push a message onto every open stream, unprompted.
    pub fn broadcast(&self, message: Value) {
        for entry in self.state.streams.iter() {
            let _ = entry.value().try_send(message.to_string());
        }
    }
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_mock_remote(mode: ReplyMode) -> MockRemote {
    let state = Arc::new(MockRemoteState {
        mode,
        streams: DashMap::new(),
        connects: AtomicUsize::new(0),
        forwarded: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/sse", get(open_stream))
        .route("/messages", post(accept_message))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock remote");
    let addr = listener.local_addr().expect("mock remote addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock remote");
    });

    MockRemote { addr, state, server }
}

/// A bridge instance bound to a random local port, serving in the
/// background until dropped.
pub struct TestBridge {
    pub state: Arc<http_mcp_bridge::BridgeState>,
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl TestBridge {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_bridge(remote_url: url::Url) -> TestBridge {
    let state = http_mcp_bridge::BridgeState::new(remote_url);
    let app = http_mcp_bridge::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind bridge");
    let addr = listener.local_addr().expect("bridge addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve bridge");
    });

    TestBridge { state, addr, server }
}

/// Pull the minted session id out of a handshake rejection detail.
pub fn minted_id(detail: &str) -> String {
    detail
        .strip_prefix("Invalid session id. Try /sse/messages/")
        .expect("handshake detail should embed a retry URL")
        .to_string()
}

#[derive(Deserialize)]
struct StreamQuery {
    stream_id: String,
}

async fn open_stream(
    State(state): State<Arc<MockRemoteState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.connects.fetch_add(1, Ordering::SeqCst);

    let stream_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<String>(16);
    state.streams.insert(stream_id.clone(), tx);

    let endpoint = stream::once(async move {
        Ok::<_, Infallible>(
            Event::default()
                .event("endpoint")
                .data(format!("/messages?stream_id={stream_id}")),
        )
    });
    let messages = ReceiverStream::new(rx)
        .map(|data| Ok::<_, Infallible>(Event::default().event("message").data(data)));

    Sse::new(endpoint.chain(messages))
}

async fn accept_message(
    State(state): State<Arc<MockRemoteState>>,
    Query(query): Query<StreamQuery>,
    Json(message): Json<Value>,
) -> StatusCode {
    state.forwarded.fetch_add(1, Ordering::SeqCst);

    if let Some(tx) = state.streams.get(&query.stream_id) {
        match state.mode {
            ReplyMode::Echo => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": message.get("id").cloned().unwrap_or(Value::Null),
                    "result": { "echo": message.get("method").cloned().unwrap_or(Value::Null) }
                });
                let _ = tx.send(reply.to_string()).await;
            }
            ReplyMode::Garbled => {
                let _ = tx.send("not json at all".to_string()).await;
            }
            ReplyMode::Silent => {}
        }
    }

    StatusCode::ACCEPTED
}
