//! Persistent streaming link to the remote peer.
//!
//! A [`RemoteConnection`] owns one server-push event stream: a long-lived GET
//! that delivers JSON-RPC envelopes as `message` events, plus the POST
//! endpoint the remote announces for outbound messages. The wire framing is
//! delegated to `reqwest` + `eventsource-stream`; this module only moves
//! decoded values.
//!
//! State machine: `Disconnected → Connecting → Connected → Closed`, with
//! `Closed` terminal. A connection that fails to connect goes straight to
//! `Closed` and must be discarded; there is no automatic retry.

use crate::error::{BridgeError, Result};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, HeaderMap};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Event name the remote uses to announce where messages are POSTed.
const ENDPOINT_EVENT: &str = "endpoint";
/// Event name carrying a JSON-RPC envelope.
const MESSAGE_EVENT: &str = "message";

/// Seconds to wait for the endpoint announcement during `connect`.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Buffered inbound messages before the reader task backpressures.
const INBOUND_BUFFER: usize = 100;

/// Header fields that must not be forwarded to the remote: they describe the
/// inbound HTTP hop, not the outbound stream, and a stale value (e.g. the
/// original request's content-length) would invalidate the new transport.
const STRIPPED_HEADERS: [&str; 4] = ["content-length", "host", "transfer-encoding", "connection"];

type EventResult =
    std::result::Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>;
type SseStream = Pin<Box<dyn Stream<Item = EventResult> + Send>>;

/// Snapshot of a connection's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Live half of a connected link.
struct Channel {
    /// Resolved URL the remote announced for outbound messages.
    endpoint: Url,
    /// Decoded inbound messages, or transport errors surfaced as values.
    inbound: mpsc::Receiver<Result<Value>>,
    /// Reader task pumping the event stream into `inbound`.
    reader: JoinHandle<()>,
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(Channel),
    Closed,
}

/// One streaming link to a remote peer: connect, send one message, receive
/// within a deadline, close.
pub struct RemoteConnection {
    url: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    state: ConnectionState,
}

impl RemoteConnection {
    /// Create an unconnected link to `url`. `headers` are the caller's
    /// forwarded headers; transport-invalidating fields are stripped here.
    pub fn new(url: Url, headers: &HeaderMap) -> Self {
        Self {
            url,
            headers: sanitize_headers(headers),
            http: reqwest::Client::new(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.state {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Closed => ConnectionStatus::Closed,
        }
    }

    /// Establish the event stream and wait for the remote's endpoint
    /// announcement. Valid only from `Disconnected`; on failure the
    /// connection becomes `Closed` and must be discarded.
    pub async fn connect(&mut self) -> Result<()> {
        if !matches!(self.state, ConnectionState::Disconnected) {
            return Err(BridgeError::Connect(
                "connect is only valid on a fresh connection".to_string(),
            ));
        }
        self.state = ConnectionState::Connecting;

        match self.establish().await {
            Ok(channel) => {
                info!(url = %self.url, endpoint = %channel.endpoint, "Connected to remote event stream");
                self.state = ConnectionState::Connected(channel);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Channel> {
        debug!(url = %self.url, "Opening event stream");
        let response = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?
            .error_for_status()
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let mut events: SseStream = Box::pin(response.bytes_stream().eventsource());

        // The remote announces its message endpoint before anything else.
        let announced = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            await_endpoint(&mut events),
        )
        .await
        .map_err(|_| {
            BridgeError::Connect(format!(
                "remote did not announce a message endpoint within {CONNECT_TIMEOUT_SECS}s"
            ))
        })??;

        let endpoint = resolve_endpoint(&self.url, &announced)?;

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let reader = tokio::spawn(read_loop(events, tx));

        Ok(Channel {
            endpoint,
            inbound: rx,
            reader,
        })
    }

    /// Enqueue exactly one message on the outbound side of the stream.
    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let ConnectionState::Connected(channel) = &self.state else {
            return Err(BridgeError::NotConnected);
        };

        let response = self
            .http
            .post(channel.endpoint.clone())
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to post message: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "remote rejected message: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Wait up to `timeout` for one wake-up's worth of inbound messages.
    ///
    /// Returns a non-empty batch if a message arrived, an empty batch on
    /// deadline or end-of-stream, and an error if the stream surfaced a
    /// transport failure as a value.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Vec<Value>> {
        let ConnectionState::Connected(channel) = &mut self.state else {
            return Err(BridgeError::NotConnected);
        };

        match tokio::time::timeout(timeout, channel.inbound.recv()).await {
            Ok(Some(Ok(message))) => Ok(vec![message]),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => {
                warn!(url = %self.url, "End of stream reached");
                Ok(Vec::new())
            }
            Err(_) => {
                debug!(url = %self.url, "Receive timed out");
                Ok(Vec::new())
            }
        }
    }

    /// Tear down the transport resource. Idempotent: any state transitions to
    /// `Closed`, repeated calls are no-ops.
    pub fn close(&mut self) {
        if let ConnectionState::Connected(channel) =
            std::mem::replace(&mut self.state, ConnectionState::Closed)
        {
            channel.reader.abort();
            debug!(url = %self.url, "Connection closed");
        }
    }
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn await_endpoint(events: &mut SseStream) -> Result<String> {
    while let Some(item) = events.next().await {
        let event = item.map_err(|e| BridgeError::Connect(e.to_string()))?;
        match event.event.as_str() {
            ENDPOINT_EVENT => return Ok(event.data),
            other => debug!(event = other, "Ignoring event before endpoint announcement"),
        }
    }
    Err(BridgeError::Connect(
        "stream closed before the remote announced a message endpoint".to_string(),
    ))
}

/// Pump decoded `message` events into the inbound channel. Stream-level
/// failures are forwarded as error values so `receive` can raise them; the
/// channel closing signals end-of-stream.
async fn read_loop(mut events: SseStream, tx: mpsc::Sender<Result<Value>>) {
    while let Some(item) = events.next().await {
        let forwarded = match item {
            Ok(event) => match event.event.as_str() {
                MESSAGE_EVENT => match serde_json::from_str::<Value>(&event.data) {
                    Ok(message) => tx.send(Ok(message)).await,
                    Err(e) => {
                        tx.send(Err(BridgeError::Transport(format!(
                            "invalid JSON on event stream: {e}"
                        ))))
                        .await
                    }
                },
                other => {
                    debug!(event = other, "Ignoring non-message event");
                    continue;
                }
            },
            Err(e) => {
                let _ = tx.send(Err(BridgeError::Transport(e.to_string()))).await;
                break;
            }
        };

        if forwarded.is_err() {
            // Receiver side dropped: the connection was closed.
            break;
        }
    }
    debug!("Event stream reader finished");
}

/// Resolve the announced endpoint against the stream URL. The remote may
/// announce a relative path, an absolute path, or a full URL.
fn resolve_endpoint(stream_url: &Url, announced: &str) -> Result<Url> {
    let trimmed = announced.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::Connect(
            "remote announced an empty message endpoint".to_string(),
        ));
    }
    match Url::parse(trimmed) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(stream_url.join(trimmed)?),
        Err(e) => Err(BridgeError::UrlParse(e)),
    }
}

/// Copy `inbound` minus the transport-invalidating fields.
pub fn sanitize_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound {
        if STRIPPED_HEADERS
            .iter()
            .any(|stripped| name.as_str().eq_ignore_ascii_case(stripped))
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
