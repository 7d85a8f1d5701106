//! Active session tracking with force-close capability.
//!
//! - `SessionRegistry`: tracks every live session of one proxy
//! - `SessionGuard`: RAII guard that unregisters on session exit

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::utils::now_millis;

/// Snapshot of one session's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Downstream peer address.
    pub peer: SocketAddr,
    /// Unix timestamp in milliseconds when the connection was accepted.
    pub started_at_ms: u64,
}

/// Tracks the sessions of one proxy.
///
/// Written by the acceptor and by exiting sessions, read and cleared by
/// `stop()` from any thread.
pub struct SessionRegistry {
    sessions: DashMap<u64, SessionInfo>,
    next_id: AtomicU64,
    /// Parent of every session token. Cancelling it stops the whole proxy.
    root: CancellationToken,
    /// Parent of the current generation of sessions. Replaced after
    /// `close_all()` so later sessions get a live token.
    generation: RwLock<CancellationToken>,
}

impl SessionRegistry {
    /// Creates a registry whose session tokens descend from `root`.
    pub fn new(root: CancellationToken) -> Self {
        let generation = root.child_token();
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            root,
            generation: RwLock::new(generation),
        }
    }

    /// Registers a session and returns its guard.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = self.generation.read().child_token();

        self.sessions.insert(
            id,
            SessionInfo {
                peer,
                started_at_ms: now_millis(),
            },
        );
        log::debug!(
            "[Registry] Session {} registered for {} (total: {})",
            id,
            peer,
            self.sessions.len()
        );

        SessionGuard {
            id,
            registry: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: u64) {
        if self.sessions.remove(&id).is_some() {
            log::debug!(
                "[Registry] Session {} unregistered (remaining: {})",
                id,
                self.sessions.len()
            );
        }
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns a snapshot of live sessions, ordered by id.
    #[must_use]
    pub fn sessions(&self) -> Vec<(u64, SessionInfo)> {
        let mut list: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    /// Signals every live session to close.
    ///
    /// Sessions registered afterwards are unaffected unless the root token
    /// has been cancelled too. Returns the number of sessions signalled.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        let mut generation = self.generation.write();
        generation.cancel();
        *generation = self.root.child_token();

        if count > 0 {
            log::info!("[Registry] Force-closing {} session(s)", count);
        }
        count
    }
}

/// RAII guard that unregisters a session when dropped.
pub struct SessionGuard {
    id: u64,
    registry: Arc<SessionRegistry>,
    cancel_token: CancellationToken,
}

impl SessionGuard {
    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the token cancelled when this session must stop.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
