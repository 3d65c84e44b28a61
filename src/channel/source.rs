//! Pull-based message sources and the terminal-failure signal shared by
//! both directions of a connection.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::channel::correlation::Correlated;
use crate::failure::Failure;

/// Items produced by a [`MessageSource`].
pub type SourceItem<T> = Result<Correlated<T>, Failure>;

/// Inbound half of a channel pair.
///
/// Backed by a bounded queue: the producing worker waits for the consumer to
/// pull before it delivers past the buffer, and never discards an element. A
/// terminal `StreamError` is yielded once, after which the source ends.
#[derive(Debug)]
pub struct MessageSource<T> {
    rx: mpsc::Receiver<SourceItem<T>>,
}

impl<T> MessageSource<T> {
    pub(crate) fn new(rx: mpsc::Receiver<SourceItem<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the next element. `None` once the connection has ended.
    pub async fn recv(&mut self) -> Option<SourceItem<T>> {
        self.rx.recv().await
    }

    /// Elements already delivered and waiting to be pulled.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Cancel the stream. The connection is torn down; elements already
    /// buffered can still be drained with [`recv`](Self::recv).
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for MessageSource<T> {
    type Item = SourceItem<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// First fatal failure of a connection, visible to both directions.
#[derive(Debug, Clone, Default)]
pub(crate) struct TerminalSignal(Arc<OnceLock<Failure>>);

impl TerminalSignal {
    /// Record `failure` unless an earlier one is already recorded.
    pub(crate) fn set(&self, failure: Failure) {
        let _ = self.0.set(failure);
    }

    pub(crate) fn get(&self) -> Option<Failure> {
        self.0.get().cloned()
    }

    /// The recorded failure, or a `StreamError` with `summary`.
    pub(crate) fn failure_or(&self, summary: &str) -> Failure {
        self.get().unwrap_or_else(|| Failure::stream(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::correlation::CorrelationToken;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn undemanded_elements_stay_pending() {
        let (tx, rx) = mpsc::channel(4);
        let mut source = MessageSource::new(rx);

        for n in 0..4u32 {
            tx.send(Ok(Correlated::new(CorrelationToken::new(), n)))
                .await
                .unwrap();
        }
        // Buffer is full: the producer has to wait for demand.
        assert!(tx.try_send(Ok(Correlated::new(CorrelationToken::new(), 4))).is_err());
        assert_eq!(source.pending(), 4);

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.message, 0);
        assert!(tx.try_send(Ok(Correlated::new(CorrelationToken::new(), 4))).is_ok());

        drop(tx);
        let rest: Vec<u32> = source
            .map(|item| item.unwrap().into_message())
            .collect()
            .await;
        assert_eq!(rest, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn close_is_visible_to_producer() {
        let (tx, rx) = mpsc::channel::<SourceItem<()>>(1);
        let mut source = MessageSource::new(rx);
        source.close();
        tx.closed().await;
        assert!(tx.is_closed());
    }

    #[test]
    fn terminal_signal_keeps_first_failure() {
        let signal = TerminalSignal::default();
        assert!(signal.get().is_none());
        assert_eq!(
            signal.failure_or("fallback").to_string(),
            "stream error: fallback"
        );

        signal.set(Failure::stream("peer reset"));
        signal.set(Failure::stream("later"));
        assert_eq!(
            signal.failure_or("fallback").to_string(),
            "stream error: peer reset"
        );
    }
}
