//! Connection identity and live-connection accounting.
//!
//! Every established connection, in either direction, holds a
//! [`ConnectionGuard`] for as long as its worker runs. Dropping the guard
//! (including during a panic unwind) takes the connection off the books.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        // Uniqueness only; no ordering with other memory is needed.
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Opened by `connect`.
    Outgoing,
    /// Accepted on a binding.
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }

    fn slot(self) -> usize {
        match self {
            Direction::Outgoing => 0,
            Direction::Incoming => 1,
        }
    }
}

#[derive(Debug, Default)]
struct LiveCounts([AtomicU64; 2]);

impl LiveCounts {
    fn get(&self, direction: Direction) -> u64 {
        self.0[direction.slot()].load(Ordering::SeqCst)
    }
}

/// Counts live connections per direction. Clones share the counts.
///
/// Purely observational: nothing in the connection protocol reads it.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<LiveCounts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a new connection on the books until the returned guard drops.
    pub fn track(&self, direction: Direction) -> ConnectionGuard {
        self.live.0[direction.slot()].fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened(direction);
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id: ConnectionId::next(),
            direction,
        }
    }

    /// Live connections in both directions.
    pub fn active_count(&self) -> u64 {
        self.live.get(Direction::Outgoing) + self.live.get(Direction::Incoming)
    }

    pub fn active(&self, direction: Direction) -> u64 {
        self.live.get(direction)
    }
}

/// Held by a connection worker for the lifetime of its connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<LiveCounts>,
    id: ConnectionId,
    direction: Direction,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.0[self.direction.slot()].fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed(self.direction);
        tracing::trace!(connection_id = %self.id, direction = self.direction.as_str(), "Connection released");
    }
}
