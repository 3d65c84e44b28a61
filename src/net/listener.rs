//! Bounded accept loop primitive.
//!
//! # Responsibilities
//! - Wrap a transport listener
//! - Enforce max_connections limit via semaphore
//! - Hand out a permit that lives as long as the accepted connection

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::net::transport::{Connected, TransportListener};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to accept: {0}")]
    Accept(#[from] std::io::Error),

    /// The connection limit was torn down.
    #[error("Connection limit closed")]
    Closed,
}

/// Transport listener with at most `max_connections` accepted peers alive.
///
/// Past the limit, peers stay queued in the OS backlog until a slot frees up.
pub struct Listener<L> {
    inner: L,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl<L: TransportListener> Listener<L> {
    pub fn new(inner: L, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot, then for the next peer.
    ///
    /// The permit must live as long as the accepted connection.
    pub async fn accept(&mut self) -> Result<(Connected<L::Io>, ConnectionPermit), ListenerError> {
        // No slot, no accept: peers wait in the backlog.
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let connected = self.inner.accept().await?;

        tracing::debug!(
            peer_addr = %connected.remote_addr,
            free_slots = self.slots.available_permits(),
            "Connection accepted"
        );

        Ok((connected, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Slots currently free.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One occupied connection slot. Dropping it (also on panic) frees the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
