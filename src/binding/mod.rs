//! Server binding handles.
//!
//! # State Machine
//! ```text
//! Bound ──release()──▶ Released
//! ```
//! `Bound` is only entered by a successful bind. There is no way back: a
//! released binding stays released and a fresh bind is required.
//!
//! # Data Flow
//! ```text
//! accept task (one per binding)
//!     → waits for room in the incoming queue (accept_buffer)
//!     → net::Listener::accept (max_connections permits)
//!     → channel::incoming::start (one worker per connection)
//!     → IncomingConnections stream → caller
//! ```
//!
//! # Design Decisions
//! - Accepting is demand-driven: peers wait in the OS backlog while the caller
//!   is not pulling
//! - Release closes the listening socket. Connections already pulled from the
//!   stream are left alone; ones still queued are closed
//! - Dropping the `ServerBinding` or the `IncomingConnections` releases it

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::channel::{incoming, IncomingConnection};
use crate::config::EffectiveServerSettings;
use crate::net::connection::{ConnectionTracker, Direction};
use crate::net::listener::{Listener, ListenerError};
use crate::net::transport::TransportListener;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A live listening socket.
#[derive(Debug)]
pub struct ServerBinding {
    local_addr: SocketAddr,
    incoming: Option<IncomingConnections>,
    release: BindingRelease,
}

impl ServerBinding {
    /// Address actually bound (ephemeral port resolved).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take the stream of accepted connections.
    ///
    /// The stream cannot be restarted: only the first call returns it.
    pub fn incoming(&mut self) -> Option<IncomingConnections> {
        self.incoming.take()
    }

    /// Stop accepting and close the listening socket.
    ///
    /// Idempotent. Resolves once the socket is closed.
    pub async fn release(&self) {
        self.release.release().await;
    }

    pub fn is_released(&self) -> bool {
        self.release.is_released()
    }

    /// A handle that can release this binding from another task.
    pub fn release_handle(&self) -> BindingRelease {
        self.release.clone()
    }
}

impl Drop for ServerBinding {
    fn drop(&mut self) {
        self.release.signal();
    }
}

/// Clonable release trigger for a [`ServerBinding`].
#[derive(Debug, Clone)]
pub struct BindingRelease {
    local_addr: SocketAddr,
    release_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl BindingRelease {
    /// See [`ServerBinding::release`].
    pub async fn release(&self) {
        self.signal();
        let mut closed = self.closed_rx.clone();
        // An error means the accept task is gone, which also means closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_released(&self) -> bool {
        *self.release_tx.borrow()
    }

    fn signal(&self) {
        if !self.release_tx.send_replace(true) {
            tracing::info!(address = %self.local_addr, "Binding released");
        }
    }
}

/// Connections accepted on a [`ServerBinding`], one element per peer.
///
/// Ends without error once the binding is released.
#[derive(Debug)]
pub struct IncomingConnections {
    queue: AcceptQueue,
    released: watch::Receiver<bool>,
}

/// Accepted connections not yet pulled. Shared with the accept task so it can
/// close them on release.
type AcceptQueue = Arc<Mutex<mpsc::Receiver<IncomingConnection>>>;

fn lock(queue: &AcceptQueue) -> MutexGuard<'_, mpsc::Receiver<IncomingConnection>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IncomingConnections {
    /// Wait for the next accepted connection.
    pub async fn recv(&mut self) -> Option<IncomingConnection> {
        futures_util::StreamExt::next(self).await
    }
}

impl Stream for IncomingConnections {
    type Item = IncomingConnection;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if *self.released.borrow() {
            return Poll::Ready(None);
        }
        lock(&self.queue).poll_recv(cx)
    }
}

impl Drop for IncomingConnections {
    fn drop(&mut self) {
        // Wakes the accept task, which then releases the binding.
        lock(&self.queue).close();
    }
}

/// Start accepting on `listener` and return the caller's handle.
pub(crate) fn start<L: TransportListener>(
    listener: L,
    local_addr: SocketAddr,
    effective: EffectiveServerSettings,
    tracker: ConnectionTracker,
) -> ServerBinding {
    let (tx, rx) = mpsc::channel(effective.settings.accept_buffer.max(1));
    let queue = Arc::new(Mutex::new(rx));
    let (release_tx, release_rx) = watch::channel(false);
    let release_tx = Arc::new(release_tx);
    let (closed_tx, closed_rx) = watch::channel(false);

    let accept = AcceptLoop {
        listener: Listener::new(listener, effective.settings.max_connections),
        tracker,
        tx,
        queue: Arc::clone(&queue),
        release_tx: Arc::clone(&release_tx),
        release_rx: release_rx.clone(),
        closed_tx,
    };
    let span = tracing::info_span!("binding", address = %local_addr);
    let executor = effective.executor.clone();
    executor.spawn(accept.run(effective).instrument(span));

    ServerBinding {
        local_addr,
        incoming: Some(IncomingConnections {
            queue,
            released: release_rx,
        }),
        release: BindingRelease {
            local_addr,
            release_tx,
            closed_rx,
        },
    }
}

struct AcceptLoop<L> {
    listener: Listener<L>,
    tracker: ConnectionTracker,
    tx: mpsc::Sender<IncomingConnection>,
    queue: AcceptQueue,
    release_tx: Arc<watch::Sender<bool>>,
    release_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
}

impl<L: TransportListener> AcceptLoop<L> {
    async fn run(mut self, effective: EffectiveServerSettings) {
        tracing::info!(
            max_connections = self.listener.max_connections(),
            "Accepting connections"
        );

        loop {
            let slot = tokio::select! {
                _ = self.release_rx.wait_for(|released| *released) => break,
                slot = self.tx.reserve() => match slot {
                    Ok(slot) => slot,
                    Err(_) => {
                        tracing::debug!("Incoming stream dropped, no longer accepting");
                        break;
                    }
                },
            };

            let accepted = tokio::select! {
                _ = self.release_rx.wait_for(|released| *released) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((connected, permit)) => {
                    let guard = self.tracker.track(Direction::Incoming);
                    slot.send(incoming::start(connected, &effective, permit, guard));
                }
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    drop(slot);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
                Err(ListenerError::Closed) => break,
            }
        }

        // Whatever ended the loop, the binding is released from here on.
        if !self.release_tx.send_replace(true) {
            tracing::info!("Binding released after its incoming stream was dropped");
        }

        let AcceptLoop {
            listener,
            queue,
            closed_tx,
            ..
        } = self;
        drop(listener);

        let unclaimed = {
            let mut rx = lock(&queue);
            rx.close();
            let mut unclaimed = 0usize;
            while rx.try_recv().is_ok() {
                unclaimed += 1;
            }
            unclaimed
        };
        if unclaimed > 0 {
            tracing::debug!(unclaimed, "Closed connections that were never pulled");
        }

        closed_tx.send_replace(true);
        tracing::info!("Listener closed");
    }
}
