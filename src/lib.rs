//! # HTTP to MCP Bridge
//!
//! A bridge between plain request/response HTTP and a persistent server-push
//! event stream carrying JSON-RPC messages, as served by a remote MCP peer.
//!
//! Callers that can only do synchronous HTTP get a session-scoped view of
//! the asynchronous stream:
//!
//! *   **Handshake**: a first call without a session id is rejected with a
//!     freshly minted one; retrying with that id establishes the stream.
//! *   **Forwarding**: each `POST /sse/messages/{id}` sends one JSON body
//!     over the session's stream and waits a bounded time for replies.
//! *   **Lifecycle**: one long-lived stream per session, reused across
//!     calls, closed at process shutdown.
//!
//! Messages are opaque envelopes; the bridge never interprets methods or
//! correlates ids, it only forwards and reports what arrives in the window.
//!
//! ## Example
//!
//! ```rust,no_run
//! use http_mcp_bridge::{BridgeConfig, start_bridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig {
//!         bind_addr: "127.0.0.1:8000".parse()?,
//!         remote_url: "http://127.0.0.1:8081/sse".parse()?,
//!     };
//!     start_bridge(config).await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod connection;
pub mod error;
pub mod registry;
pub mod request_handler;

pub use bridge::{BridgeConfig, BridgeState, router, start_bridge};
pub use connection::{ConnectionStatus, RemoteConnection};
pub use error::{BridgeError, Result};
pub use registry::{Session, SessionRegistry, SessionState};
