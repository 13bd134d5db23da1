//! Session registry.
//!
//! One session per SSE connection. Each session owns a bounded response
//! channel written only by `POST /message` handlers for its id and read only
//! by its own SSE writer, plus a cancellation scope derived from the server
//! lifetime. Reads dominate, so the map sits behind a reader-writer lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

/// Response frames queued per session before the SSE writer drains them.
/// Combined with the 5-second send deadline this bounds memory per slow
/// client.
pub const CHANNEL_CAPACITY: usize = 10;

/// Per-client state for one SSE connection.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    pub initialized: bool,
    pub client_name: String,
    pub client_version: String,
    pub user_agent: String,
    pub remote_addr: String,
    pub connected_at: OffsetDateTime,
}

/// Snapshot handed to `POST /message` under the read lock.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub tx: mpsc::Sender<String>,
    pub cancel: CancellationToken,
    pub initialized: bool,
}

/// Identity fields used by connection/disconnection log lines.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub initialized: bool,
    pub client_name: String,
    pub user_agent: String,
    pub remote_addr: String,
    pub connected_at: OffsetDateTime,
}

impl SessionIdentity {
    /// Display name per the logging rules: the raw initialize name, or a
    /// placeholder describing why there is none.
    pub fn display_name(&self) -> &str {
        if !self.initialized {
            "(not initialized)"
        } else if self.client_name.is_empty() {
            "(empty name)"
        } else {
            &self.client_name
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    seq: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session; returns its id, the receiving half of
    /// its response channel, and its cancellation scope.
    pub async fn register(
        &self,
        user_agent: String,
        remote_addr: String,
    ) -> (String, mpsc::Receiver<String>, CancellationToken) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 100;
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let id = format!("client-{nanos}{seq:02}");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();

        let session = Session {
            id: id.clone(),
            tx,
            cancel: cancel.clone(),
            initialized: false,
            client_name: String::new(),
            client_version: String::new(),
            user_agent,
            remote_addr,
            connected_at: OffsetDateTime::now_utc(),
        };

        self.sessions.write().await.insert(id.clone(), session);
        (id, rx, cancel)
    }

    /// Channel, cancel scope and initialized flag, copied under the read
    /// lock.
    pub async fn handle(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).map(|s| SessionHandle {
            tx: s.tx.clone(),
            cancel: s.cancel.clone(),
            initialized: s.initialized,
        })
    }

    /// Flip the session to initialized and store the client identity. MCP
    /// guarantees one initialize per session; taking the write lock here
    /// closes the theoretical race entirely (one extra acquisition per
    /// session lifetime).
    pub async fn mark_initialized(&self, id: &str, name: &str, version: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.initialized = true;
                session.client_name = name.to_string();
                session.client_version = version.to_string();
                true
            }
            None => false,
        }
    }

    pub async fn identity(&self, id: &str) -> Option<SessionIdentity> {
        self.sessions.read().await.get(id).map(|s| SessionIdentity {
            initialized: s.initialized,
            client_name: s.client_name.clone(),
            user_agent: s.user_agent.clone(),
            remote_addr: s.remote_addr.clone(),
            connected_at: s.connected_at,
        })
    }

    /// Deregister, returning the final identity for the disconnect log line.
    pub async fn unregister(&self, id: &str) -> Option<SessionIdentity> {
        self.sessions.write().await.remove(id).map(|s| {
            s.cancel.cancel();
            SessionIdentity {
                initialized: s.initialized,
                client_name: s.client_name,
                user_agent: s.user_agent,
                remote_addr: s.remote_addr,
                connected_at: s.connected_at,
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel every session for shutdown. Returns a per-user-agent count of
    /// sessions that never initialized, so the operator can diagnose noise
    /// sources.
    pub async fn shutdown(&self) -> Vec<(String, usize)> {
        let sessions = self.sessions.read().await;
        let mut uninitialized: HashMap<String, usize> = HashMap::new();
        for session in sessions.values() {
            if !session.initialized {
                let agent = if session.user_agent.is_empty() {
                    "(no user agent)".to_string()
                } else {
                    session.user_agent.clone()
                };
                *uninitialized.entry(agent).or_default() += 1;
            }
        }
        drop(sessions);

        self.shutdown.cancel();

        let mut report: Vec<(String, usize)> = uninitialized.into_iter().collect();
        report.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        report
    }
}
