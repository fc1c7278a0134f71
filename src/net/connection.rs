//! Connection identity and in-flight accounting.
//!
//! # Responsibilities
//! - Give every accepted socket an id for log correlation
//! - Count open connections, and separately those handed to the tunnel engine
//! - Let shutdown wait for them within a grace period

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection id, displayed as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    open: AtomicU64,
    tunnels: AtomicU64,
}

/// What was still open when a drain gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub open: u64,
    pub tunnels: u64,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.open == 0
    }
}

/// Shared counters for every connection the server owns.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a freshly accepted connection until the guard drops.
    pub fn track(&self) -> ConnectionGuard {
        self.counts.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id: ConnectionId::next(),
            tunnel: false,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.open.load(Ordering::SeqCst)
    }

    pub fn tunnel_count(&self) -> u64 {
        self.counts.tunnels.load(Ordering::SeqCst)
    }

    fn report(&self) -> DrainReport {
        DrainReport {
            open: self.active_count(),
            tunnels: self.tunnel_count(),
        }
    }

    /// Wait until nothing is open or `grace` elapses.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.report()
    }
}

/// Keeps one connection counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: ConnectionId,
    tunnel: bool,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Record that this socket now belongs to the tunnel engine.
    pub fn mark_tunnel(&mut self) {
        if !self.tunnel {
            self.tunnel = true;
            self.counts.tunnels.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.tunnel {
            self.counts.tunnels.fetch_sub(1, Ordering::SeqCst);
        }
        self.counts.open.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, tunnel = self.tunnel, "Connection closed");
    }
}
