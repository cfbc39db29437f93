//! BridgeEndpoint orchestration: resolve a session, forward one message,
//! wait a bounded time for replies, and render the outcome.
//!
//! The same internal routines back both the handshake surface
//! (`/sse/messages/{id}`) and the deprecated header-identified surface
//! (`/raw/*`). Failures before the forward step are hard 4xx/5xx faults;
//! failures while waiting for a reply are softened into 200 payloads so
//! polling callers keep their retry loop simple.

use crate::bridge::BridgeState;
use crate::connection::RemoteConnection;
use crate::registry::Session;
use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Session header of the deprecated surface.
pub const SESSION_HEADER: &str = "x-mcp-bridge";

/// Seconds to wait for a reply when the caller supplies no `timeout`.
const DEFAULT_TIMEOUT_SECS: i64 = 1;

fn detail_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn notice_response(message: String) -> Response {
    (StatusCode::OK, Json(json!({ "message": message }))).into_response()
}

/// Parse the `timeout` query parameter: base-10 integer seconds, default 1.
/// Negative values behave like an immediately elapsed deadline.
fn parse_timeout(raw: Option<&str>) -> std::result::Result<Duration, Response> {
    let secs = match raw {
        None => DEFAULT_TIMEOUT_SECS,
        Some(raw) => match raw.parse::<i64>() {
            Ok(secs) => secs,
            Err(_) => {
                return Err(detail_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid 'timeout' parameter. It must be an integer.",
                ));
            }
        },
    };
    Ok(Duration::from_secs(secs.max(0) as u64))
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Core flow for `/sse`, `/sse/messages`, and `/sse/messages/{id}`.
pub async fn handle_sync_messages(
    state: Arc<BridgeState>,
    session_id: Option<String>,
    timeout_param: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Session resolution. A missing or unknown id teaches the caller a
    // fresh one: the deliberate two-step handshake.
    let session = match session_id
        .as_deref()
        .and_then(|id| state.registry.resolve(id))
    {
        Some(session) => session,
        None => {
            let new_id = state.registry.new_id();
            state.registry.ensure(&new_id);
            info!(session_id = %new_id, supplied = ?session_id, "Minting session id for handshake");
            return detail_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid session id. Try /sse/messages/{new_id}"),
            );
        }
    };

    // Exclusive for the whole cycle: connect-promotion, send, and receive.
    // A second caller for the same id waits here instead of interleaving.
    let mut slot = session.connection().await;

    // 2. Connect if the session is still pending.
    if let Err(response) = ensure_connected(&state, &session, &mut slot, &headers).await {
        return response;
    }

    // 3. Timeout parse.
    let timeout = match parse_timeout(timeout_param.as_deref()) {
        Ok(timeout) => timeout,
        Err(response) => return response,
    };

    // 4 + 5. Forward and await.
    forward_and_receive(&session, &mut slot, &body, timeout).await
}

/// Promote a pending session to connected, or reuse the live connection.
/// Runs under the session lock, so concurrent first-callers produce exactly
/// one connection. A connect failure leaves the slot empty (the session
/// stays pending) and the doomed connection is dropped.
async fn ensure_connected(
    state: &BridgeState,
    session: &Session,
    slot: &mut Option<RemoteConnection>,
    headers: &HeaderMap,
) -> std::result::Result<(), Response> {
    if slot.is_some() {
        debug!(session_id = %session.id(), "Reusing existing connection");
        return Ok(());
    }

    let mut conn = RemoteConnection::new(state.remote_url.clone(), headers);
    match conn.connect().await {
        Ok(()) => {
            info!(session_id = %session.id(), "New connection established");
            *slot = Some(conn);
            Ok(())
        }
        Err(e) => {
            error!(session_id = %session.id(), "Failed to connect to remote: {e}");
            Err(detail_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to connect to remote: {e}"),
            ))
        }
    }
}

/// Parse the body, send it, and wait up to `timeout` for replies.
async fn forward_and_receive(
    session: &Session,
    slot: &mut Option<RemoteConnection>,
    body: &Bytes,
    timeout: Duration,
) -> Response {
    let Some(conn) = slot.as_mut() else {
        // ensure_connected ran first; an empty slot means the session was
        // closed out from under us.
        return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
    };

    let message: Value = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(e) => {
            warn!(session_id = %session.id(), "Failed to process request: {e}");
            return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
        }
    };

    debug!(session_id = %session.id(), "Forwarding message: {message}");
    if let Err(e) = conn.send(&message).await {
        warn!(session_id = %session.id(), "Failed to process request: {e}");
        return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
    }

    match conn.receive(timeout).await {
        Ok(messages) if !messages.is_empty() => {
            debug!(session_id = %session.id(), count = messages.len(), "Returning received messages");
            (StatusCode::OK, Json(Value::Array(messages))).into_response()
        }
        Ok(_) => {
            warn!(session_id = %session.id(), "Timeout waiting for messages");
            notice_response("Timeout waiting for messages".to_string())
        }
        Err(e) => {
            warn!(session_id = %session.id(), "Error while receiving messages: {e}");
            notice_response(format!("Error while receiving messages: {e}"))
        }
    }
}

/// Deprecated read surface: `GET /raw/sse` with the session id in a header.
/// Same resolution and connect rules, minus the minted-id handshake; the id
/// is whatever the caller put in the header.
pub async fn handle_legacy_read(state: Arc<BridgeState>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        let example = state.registry.new_id();
        return detail_response(
            StatusCode::BAD_REQUEST,
            format!("Missing '{SESSION_HEADER}' header. Try {example}, for example."),
        );
    };

    let session = state.registry.ensure(&session_id);
    let mut slot = session.connection().await;
    if let Err(response) = ensure_connected(&state, &session, &mut slot, &headers).await {
        return response;
    }
    let Some(conn) = slot.as_mut() else {
        return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
    };

    match conn
        .receive(Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64))
        .await
    {
        Ok(messages) => (StatusCode::OK, Json(Value::Array(messages))).into_response(),
        Err(e) => {
            warn!(session_id = %session_id, "Failed to process request: {e}");
            detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request")
        }
    }
}

/// Deprecated write surface: `POST /raw/messages`. Requires an already
/// established session; the message is forwarded without waiting for a
/// reply (the reply arrives on a later read).
pub async fn handle_legacy_write(
    state: Arc<BridgeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return detail_response(
            StatusCode::BAD_REQUEST,
            format!("Missing '{SESSION_HEADER}' header"),
        );
    };

    let Some(session) = state.registry.resolve(&session_id) else {
        return detail_response(StatusCode::BAD_REQUEST, "Session not found");
    };

    let mut slot = session.connection().await;
    let Some(conn) = slot.as_mut() else {
        warn!(session_id = %session_id, "Session has no connection yet");
        return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(session_id = %session_id, "Failed to process request: {e}");
            return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request");
        }
    };

    match conn.send(&message).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Message sent to session {session_id}") })),
        )
            .into_response(),
        Err(e) => {
            warn!(session_id = %session_id, "Failed to process request: {e}");
            detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request")
        }
    }
}
