//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::net::connection::ConnectionTracker;

/// Interval at which [`drain`] samples the live-connection count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Broadcast shutdown trigger.
///
/// The coordinator and every long-running task subscribe to it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of subscribers still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for live connections to close, up to `grace`.
///
/// Returns the number still open when the grace period ran out.
pub async fn drain(tracker: &ConnectionTracker, grace: Duration) -> u64 {
    let waiting = async {
        while tracker.active_count() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(grace, waiting).await.is_err() {
        let remaining = tracker.active_count();
        tracing::warn!(remaining, "Drain deadline reached with connections open");
        return remaining;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::Direction;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_connections() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(Direction::Incoming);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(guard);
        });

        assert_eq!(drain(&tracker, Duration::from_secs(5)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track(Direction::Outgoing);

        assert_eq!(drain(&tracker, Duration::from_secs(1)).await, 1);
    }
}
