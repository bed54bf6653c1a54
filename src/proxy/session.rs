//! Proxy session bookkeeping
//!
//! A [`ProxySession`] is one client-to-backend tunnel. The Upgrade Splicer
//! owns it for its whole life and drives it through [`SessionState`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One direction of a spliced session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

/// Lifecycle of an upgrade session.
///
/// ```text
/// Pending -> Handshaking -> Established -> Draining(dir) -> Closed
///               |               |
///               +---------------+------------------------> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Handshaking,
    Established,
    /// The given direction reached EOF; the other may still be flowing
    Draining(Direction),
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ClientClosed,
    BackendClosed,
    /// Client went away before or during the handshake, or reset the tunnel
    ClientDisconnected,
    /// Backend reset the tunnel
    UpstreamReset,
    BackendUnreachable,
    /// Backend answered the upgrade with something other than 101
    ProtocolMismatch,
    IdleTimeout,
    SessionLimit,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::ClientClosed => "client-closed",
            TerminationReason::BackendClosed => "backend-closed",
            TerminationReason::ClientDisconnected => "client-disconnected",
            TerminationReason::UpstreamReset => "upstream-reset",
            TerminationReason::BackendUnreachable => "backend-unreachable",
            TerminationReason::ProtocolMismatch => "protocol-mismatch",
            TerminationReason::IdleTimeout => "idle-timeout",
            TerminationReason::SessionLimit => "session-limit",
        };
        f.write_str(s)
    }
}

/// Byte counters and last-activity clock shared with the copy loops.
#[derive(Debug)]
pub struct Traffic {
    origin: Instant,
    client_to_backend: AtomicU64,
    backend_to_client: AtomicU64,
    last_activity_ms: AtomicU64,
}

impl Traffic {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            client_to_backend: AtomicU64::new(0),
            backend_to_client: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn record(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::ClientToBackend => &self.client_to_backend,
            Direction::BackendToClient => &self.backend_to_client,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Restart the idle clock without counting bytes.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(self.origin.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::ClientToBackend => self.client_to_backend.load(Ordering::Relaxed),
            Direction::BackendToClient => self.backend_to_client.load(Ordering::Relaxed),
        }
    }

    /// Time since any byte moved in either direction.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

#[derive(Debug)]
pub struct ProxySession {
    pub peer: SocketAddr,
    pub path: String,
    pub created_at: Instant,
    state: SessionState,
    termination: Option<TerminationReason>,
    traffic: Arc<Traffic>,
}

impl ProxySession {
    pub fn new(peer: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            peer,
            path: path.into(),
            created_at: Instant::now(),
            state: SessionState::Pending,
            termination: None,
            traffic: Arc::new(Traffic::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn traffic(&self) -> Arc<Traffic> {
        Arc::clone(&self.traffic)
    }

    pub fn bytes(&self, direction: Direction) -> u64 {
        self.traffic.bytes(direction)
    }

    /// Move to `next`. Closed is terminal; later transitions are ignored.
    pub fn transition(&mut self, next: SessionState) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::trace!(path = %self.path, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    /// Enter Closed, keeping the first recorded reason.
    pub fn close(&mut self, reason: TerminationReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closed);
        self.termination.get_or_insert(reason);
    }
}
