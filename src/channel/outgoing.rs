//! Client side of a channel pair.
//!
//! # Data Flow
//! ```text
//! caller → RequestSink (bounded queue)
//!     → worker: Host header, request deadline, hyper http1 exchange
//!     → response body buffered up to max_response_body_bytes
//!     → ResponseSource (bounded queue) → caller
//! ```
//!
//! # Design Decisions
//! - Exchanges run one at a time, so responses keep request order
//! - A timed-out request yields a `RequestTimeout` item. Its exchange stays
//!   in flight and is drained before the next request goes out, so the
//!   connection survives a slow peer
//! - `RequestSink::close` stops every clone; queued requests still run
//! - Dropping the response source tears the connection down

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderValue, HOST};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::channel::correlation::{Correlated, CorrelationToken};
use crate::channel::source::{MessageSource, SourceItem, TerminalSignal};
use crate::config::{ClientSettings, EffectiveClientSettings};
use crate::endpoint::RemoteAddress;
use crate::failure::{Failure, RequestDescriptor, TimedOutRequest};
use crate::net::connection::{ConnectionGuard, ConnectionId, Direction};
use crate::observability::metrics;
use crate::resilience::{Deadline, Elapsed};

/// Responses of an [`OutgoingConnection`], in request order.
pub type ResponseSource = MessageSource<Response<Bytes>>;

/// An established outgoing HTTP/1.1 connection.
#[derive(Debug)]
pub struct OutgoingConnection {
    id: ConnectionId,
    remote: RemoteAddress,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    requests: RequestSink,
    responses: ResponseSource,
}

impl OutgoingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Target as named in the connect request.
    pub fn remote(&self) -> &RemoteAddress {
        &self.remote
    }

    /// Peer address the connection was established with.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address, with any ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn requests(&self) -> &RequestSink {
        &self.requests
    }

    pub fn responses(&mut self) -> &mut ResponseSource {
        &mut self.responses
    }

    pub fn split(self) -> (RequestSink, ResponseSource) {
        (self.requests, self.responses)
    }
}

/// Outbound half of an [`OutgoingConnection`].
///
/// Cloning yields another handle onto the same ordered queue. The connection
/// finishes its in-flight work and closes once every handle is dropped or
/// any handle calls [`close`](Self::close).
#[derive(Debug, Clone)]
pub struct RequestSink {
    tx: mpsc::Sender<Correlated<Request<Bytes>>>,
    closing: Arc<watch::Sender<bool>>,
    terminal: TerminalSignal,
}

impl RequestSink {
    /// Queue `request`, waiting while the queue is full.
    ///
    /// The returned token accompanies the matching response.
    pub async fn send(&self, request: Request<Bytes>) -> Result<CorrelationToken, Failure> {
        if *self.closing.borrow() {
            return Err(Failure::stream("request stream closed"));
        }
        let token = CorrelationToken::new();
        self.tx
            .send(Correlated::new(token, request))
            .await
            .map_err(|_| self.terminal.failure_or("connection closed"))?;
        Ok(token)
    }

    /// True once the connection no longer accepts requests.
    pub fn is_closed(&self) -> bool {
        *self.closing.borrow() || self.tx.is_closed()
    }

    /// Refuse further requests on this handle and all its clones.
    ///
    /// Requests already queued are still sent and answered.
    pub fn close(&self) {
        if !self.closing.send_replace(true) {
            tracing::debug!("Request stream closed by caller");
        }
    }
}

/// Socket addresses as negotiated by the transport.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Addresses {
    pub(crate) local: SocketAddr,
    pub(crate) remote: SocketAddr,
}

/// Perform the HTTP/1.1 client handshake over an established stream.
pub(crate) async fn handshake<Io>(
    io: Io,
) -> Result<
    (
        SendRequest<Full<Bytes>>,
        http1::Connection<TokioIo<Io>, Full<Bytes>>,
    ),
    hyper::Error,
>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    http1::handshake(TokioIo::new(io)).await
}

/// Spawn the connection worker and hand back the caller's endpoints.
pub(crate) fn start<Io>(
    sender: SendRequest<Full<Bytes>>,
    connection: http1::Connection<TokioIo<Io>, Full<Bytes>>,
    addresses: Addresses,
    remote: RemoteAddress,
    effective: EffectiveClientSettings,
    guard: ConnectionGuard,
) -> OutgoingConnection
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let buffer = effective.settings.stream_buffer.max(1);
    let (request_tx, request_rx) = mpsc::channel(buffer);
    let (response_tx, response_rx) = mpsc::channel(buffer);
    let (closing_tx, closing_rx) = watch::channel(false);
    let terminal = TerminalSignal::default();
    let id = guard.id();

    let span = tracing::info_span!(
        "outgoing",
        connection_id = %id,
        remote = %remote,
        local_addr = %addresses.local,
    );

    let driver = effective.executor.spawn(connection);
    let worker = ClientWorker {
        id,
        remote: remote.clone(),
        settings: effective.settings,
        sender,
        requests: request_rx,
        closing: closing_rx,
        responses: response_tx,
        in_flight: None,
        terminal: terminal.clone(),
        _guard: guard,
    };
    effective
        .executor
        .spawn(worker.run(driver).instrument(span));

    OutgoingConnection {
        id,
        remote,
        remote_addr: addresses.remote,
        local_addr: addresses.local,
        requests: RequestSink {
            tx: request_tx,
            closing: Arc::new(closing_tx),
            terminal,
        },
        responses: MessageSource::new(response_rx),
    }
}

/// A response still being received, boxed so it can outlive its deadline.
type InFlight = Pin<Box<dyn Future<Output = Result<Response<Bytes>, Failure>> + Send>>;

enum Exit {
    /// The request stream ended and all exchanges completed.
    Finished,
    /// The peer closed the connection cleanly.
    PeerClosed,
    /// The caller dropped or closed the response source.
    Cancelled,
    Failed(Failure),
}

struct ClientWorker {
    id: ConnectionId,
    remote: RemoteAddress,
    settings: ClientSettings,
    sender: SendRequest<Full<Bytes>>,
    requests: mpsc::Receiver<Correlated<Request<Bytes>>>,
    closing: watch::Receiver<bool>,
    responses: mpsc::Sender<SourceItem<Response<Bytes>>>,
    /// Exchange whose request timed out but whose response is still owed.
    in_flight: Option<InFlight>,
    terminal: TerminalSignal,
    _guard: ConnectionGuard,
}

impl ClientWorker {
    async fn run(mut self, mut driver: JoinHandle<Result<(), hyper::Error>>) {
        tracing::debug!("Connection established");

        let mut closing = false;
        let exit = loop {
            let idle = idle_timer(self.settings.idle_timeout());
            tokio::select! {
                _ = self.responses.closed() => break Exit::Cancelled,
                res = &mut driver => break driver_exit(res),
                _ = close_requested(&mut self.closing), if !closing => {
                    // Queued requests still drain before recv yields None.
                    closing = true;
                    self.requests.close();
                }
                next = self.requests.recv() => match next {
                    None => break Exit::Finished,
                    Some(request) => {
                        if let Err(exit) = self.exchange(request).await {
                            break exit;
                        }
                    }
                },
                _ = idle => {
                    break Exit::Failed(Failure::stream(format!(
                        "connection idle for {}ms",
                        self.settings.idle_timeout_ms
                    )));
                }
            }
        };

        driver.abort();
        self.finish(exit).await;
    }

    async fn exchange(&mut self, request: Correlated<Request<Bytes>>) -> Result<(), Exit> {
        let Correlated { token, message } = request;
        let descriptor = RequestDescriptor {
            token,
            method: message.method().to_string(),
            uri: message.uri().to_string(),
        };

        let deadline = Deadline::after(self.settings.request_timeout());
        let item = match deadline.run(self.round_trip(message)).await {
            Ok(Ok(response)) => {
                tracing::trace!(token = %token, status = %response.status(), "Response received");
                Ok(Correlated::new(token, response))
            }
            Ok(Err(failure)) => return Err(Exit::Failed(failure)),
            Err(Elapsed) => {
                tracing::warn!(token = %token, method = %descriptor.method, uri = %descriptor.uri, "Request timed out");
                Err(Failure::timeout(
                    TimedOutRequest::Http(descriptor),
                    deadline.describe("request"),
                ))
            }
        };

        self.responses.send(item).await.map_err(|_| Exit::Cancelled)
    }

    /// One exchange. Cancelling this future leaves the exchange in
    /// `in_flight`, where the next call picks it up.
    async fn round_trip(&mut self, request: Request<Bytes>) -> Result<Response<Bytes>, Failure> {
        if let Some(late) = self.in_flight.as_mut() {
            // HTTP/1.1 answers in order: the stale response comes first.
            match late.await {
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "Discarded response to a timed-out request")
                }
                Err(e) => tracing::debug!(error = %e, "Timed-out exchange ended without a response"),
            }
            self.in_flight = None;
        }

        self.sender
            .ready()
            .await
            .map_err(|e| Failure::stream(format!("connection unusable: {e}")))?;

        let request = self.prepare(request);
        let exchange: InFlight = Box::pin(receive(
            self.sender.send_request(request),
            self.settings.max_response_body_bytes,
        ));
        let result = self.in_flight.insert(exchange).await;
        self.in_flight = None;
        result
    }

    fn prepare(&self, request: Request<Bytes>) -> Request<Full<Bytes>> {
        let (mut parts, body) = request.into_parts();
        if !parts.headers.contains_key(HOST) {
            if let Ok(host) = HeaderValue::from_str(&self.remote.authority()) {
                parts.headers.insert(HOST, host);
            }
        }
        Request::from_parts(parts, Full::new(body))
    }

    async fn finish(mut self, exit: Exit) {
        self.requests.close();
        let unsent = self.requests.len();
        // A stale exchange that never completed means a request went unanswered.
        let abandoned = self
            .in_flight
            .take()
            .is_some_and(|late| !matches!(late.now_or_never(), Some(Ok(_))));

        let failure = match exit {
            Exit::Finished => {
                tracing::debug!("Request stream closed, connection finished");
                return;
            }
            Exit::Cancelled => {
                tracing::debug!("Response stream cancelled, closing connection");
                self.terminal.set(Failure::stream("response stream cancelled"));
                return;
            }
            Exit::PeerClosed if abandoned => {
                Failure::stream("connection closed by peer before answering a timed-out request")
            }
            Exit::PeerClosed if unsent == 0 => {
                tracing::debug!("Connection closed by peer");
                self.terminal.set(Failure::stream("connection closed by peer"));
                return;
            }
            Exit::PeerClosed => Failure::stream(format!(
                "connection closed by peer with {unsent} requests unsent"
            )),
            Exit::Failed(failure) => failure,
        };

        tracing::warn!(connection_id = %self.id, error = %failure, "Connection failed");
        metrics::record_stream_failure(Direction::Outgoing, failure.kind());
        self.terminal.set(failure.clone());
        let _ = self.responses.send(Err(failure)).await;
    }
}

async fn receive<F>(response: F, limit: usize) -> Result<Response<Bytes>, Failure>
where
    F: Future<Output = hyper::Result<Response<Incoming>>>,
{
    let response = response
        .await
        .map_err(|e| Failure::stream(format!("exchange failed: {e}")))?;

    let (parts, body) = response.into_parts();
    let body = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                Failure::stream(format!("response body exceeds {limit} bytes"))
            } else {
                Failure::stream(format!("reading response body failed: {e}"))
            }
        })?
        .to_bytes();

    Ok(Response::from_parts(parts, body))
}

/// Resolves once a caller closes the request stream or every handle is gone.
async fn close_requested(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closed| *closed).await;
}

fn driver_exit(res: Result<Result<(), hyper::Error>, JoinError>) -> Exit {
    match res {
        Ok(Ok(())) => Exit::PeerClosed,
        Ok(Err(e)) => Exit::Failed(Failure::stream(format!("connection error: {e}"))),
        Err(e) => Exit::Failed(Failure::stream(format!("connection driver stopped: {e}"))),
    }
}

async fn idle_timer(idle: Option<std::time::Duration>) {
    match idle {
        Some(idle) => tokio::time::sleep(idle).await,
        None => std::future::pending().await,
    }
}
