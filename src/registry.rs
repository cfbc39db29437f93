//! Session tracking for the bridge.
//!
//! The registry is the only cross-request shared mutable state in the
//! process: an id-to-session map that starts empty and is drained at
//! shutdown. A session owns at most one [`RemoteConnection`], guarded by a
//! per-session mutex so that one forward-and-await cycle runs at a time and
//! concurrent first-callers cannot race a second connection into existence.

use crate::connection::RemoteConnection;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

/// Resolution outcome for a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Empty or never-minted id.
    Unknown,
    /// Minted by a handshake rejection, no connection yet.
    Pending,
    /// Holding a live connection.
    Connected,
}

/// One logical client conversation. The connection slot is `None` while the
/// session is pending; promotion happens under the mutex, which also
/// serializes every send/receive cycle on the shared connection.
pub struct Session {
    id: String,
    conn: Mutex<Option<RemoteConnection>>,
}

impl Session {
    fn new(id: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            conn: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exclusive access to the connection slot. Callers hold the guard for
    /// the whole connect/forward/await cycle.
    pub async fn connection(&self) -> MutexGuard<'_, Option<RemoteConnection>> {
        self.conn.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

/// Process-wide map of session ids to session records. Lives for the process
/// lifetime; there is no idle eviction.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh unguessable session identifier.
    pub fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Look up a session. Empty ids are never resolvable.
    pub fn resolve(&self, id: &str) -> Option<Arc<Session>> {
        if id.is_empty() {
            return None;
        }
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Create-if-absent. Atomic under concurrent callers for the same id:
    /// exactly one record is ever created per id.
    pub fn ensure(&self, id: &str) -> Arc<Session> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    /// Resolution snapshot for logging and tests.
    pub async fn state(&self, id: &str) -> SessionState {
        match self.resolve(id) {
            None => SessionState::Unknown,
            Some(session) if session.is_connected().await => SessionState::Connected,
            Some(_) => SessionState::Pending,
        }
    }

    /// Every tracked session, for shutdown draining.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every live connection and clear the map. Best-effort: one
    /// session failing to lock or close does not stop the others.
    pub async fn close_all(&self) {
        for session in self.all() {
            match session.conn.try_lock() {
                Ok(mut slot) => {
                    if let Some(conn) = slot.as_mut() {
                        info!(session_id = %session.id, "Closing connection");
                        conn.close();
                    }
                }
                Err(_) => {
                    warn!(session_id = %session.id, "Connection busy at shutdown, skipping close");
                }
            }
        }
        self.sessions.clear();
    }
}
