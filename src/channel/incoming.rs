//! Server side of a channel pair.
//!
//! # Data Flow
//! ```text
//! peer → hyper http1 server connection
//!     → body buffered up to max_request_body_bytes (413 beyond)
//!     → RequestSource (bounded queue) → caller
//! caller → ResponseSink::send(token, response)
//!     → pending exchange for that token → hyper writes the response
//! ```
//!
//! # Design Decisions
//! - The request deadline covers both queueing for the caller and waiting
//!   for its response; on expiry the peer gets a 503
//! - A response sent for a timed-out token is refused with `RequestTimeout`
//! - Dropping the request source shuts the connection down gracefully

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::channel::correlation::{Correlated, CorrelationToken};
use crate::channel::source::{MessageSource, SourceItem, TerminalSignal};
use crate::config::{EffectiveServerSettings, ServerSettings};
use crate::failure::{Failure, RequestDescriptor, TimedOutRequest};
use crate::net::connection::{ConnectionGuard, ConnectionId, Direction};
use crate::net::listener::ConnectionPermit;
use crate::net::transport::Connected;
use crate::observability::metrics;
use crate::resilience::{Deadline, Elapsed};

/// Requests of an [`IncomingConnection`], in arrival order.
pub type RequestSource = MessageSource<Request<Bytes>>;

/// One accepted peer connection.
#[derive(Debug)]
pub struct IncomingConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    requests: RequestSource,
    responses: ResponseSink,
}

impl IncomingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn requests(&mut self) -> &mut RequestSource {
        &mut self.requests
    }

    pub fn responses(&self) -> &ResponseSink {
        &self.responses
    }

    pub fn split(self) -> (RequestSource, ResponseSink) {
        (self.requests, self.responses)
    }
}

enum Pending {
    Waiting(oneshot::Sender<Response<Bytes>>),
    TimedOut(RequestDescriptor),
}

type PendingExchanges = Arc<DashMap<CorrelationToken, Pending>>;

/// Outbound half of an [`IncomingConnection`].
#[derive(Clone)]
pub struct ResponseSink {
    pending: PendingExchanges,
    terminal: TerminalSignal,
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ResponseSink {
    /// Answer the request identified by `token`.
    pub fn send(&self, token: CorrelationToken, response: Response<Bytes>) -> Result<(), Failure> {
        match self.pending.remove(&token) {
            Some((_, Pending::Waiting(tx))) => tx
                .send(response)
                .map_err(|_| self.terminal.failure_or("connection closed")),
            Some((_, Pending::TimedOut(descriptor))) => Err(Failure::timeout(
                TimedOutRequest::Http(descriptor),
                "response arrived after the request deadline",
            )),
            None => Err(self
                .terminal
                .get()
                .unwrap_or_else(|| Failure::stream(format!("unknown correlation token {token}")))),
        }
    }

    /// Requests delivered but not yet answered.
    pub fn outstanding(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| matches!(entry.value(), Pending::Waiting(_)))
            .count()
    }
}

/// Spawn the worker serving one accepted connection.
pub(crate) fn start<Io>(
    connected: Connected<Io>,
    effective: &EffectiveServerSettings,
    permit: ConnectionPermit,
    guard: ConnectionGuard,
) -> IncomingConnection
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let buffer = effective.settings.stream_buffer.max(1);
    let (request_tx, request_rx) = mpsc::channel(buffer);
    let pending = PendingExchanges::default();
    let terminal = TerminalSignal::default();
    let id = guard.id();

    let span = tracing::info_span!(
        "incoming",
        connection_id = %id,
        remote_addr = %connected.remote_addr,
    );

    let exchanges = Arc::new(Exchanges {
        settings: effective.settings.clone(),
        requests: request_tx,
        pending: pending.clone(),
    });
    let worker = ServerWorker {
        exchanges,
        terminal: terminal.clone(),
        _permit: permit,
        _guard: guard,
    };

    let Connected {
        io,
        local_addr,
        remote_addr,
    } = connected;
    effective.executor.spawn(worker.run(io).instrument(span));

    IncomingConnection {
        id,
        remote_addr,
        local_addr,
        requests: MessageSource::new(request_rx),
        responses: ResponseSink { pending, terminal },
    }
}

/// Shared by every request the hyper service handles on one connection.
struct Exchanges {
    settings: ServerSettings,
    requests: mpsc::Sender<SourceItem<Request<Bytes>>>,
    pending: PendingExchanges,
}

impl Exchanges {
    async fn handle(&self, request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Failure> {
        let deadline = Deadline::after(self.settings.request_timeout());
        let limit = self.settings.max_request_body_bytes;

        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                tracing::warn!(limit, uri = %parts.uri, "Request body too large");
                return Ok(status_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("request body exceeds {limit} bytes"),
                ));
            }
            Err(e) => return Err(Failure::stream(format!("reading request body failed: {e}"))),
        };

        let token = CorrelationToken::new();
        let descriptor = RequestDescriptor {
            token,
            method: parts.method.to_string(),
            uri: parts.uri.to_string(),
        };
        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(token, Pending::Waiting(tx));

        let delivery = self
            .requests
            .send(Ok(Correlated::new(token, Request::from_parts(parts, body))));
        match deadline.run(delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.pending.remove(&token);
                return Err(Failure::stream("request stream closed"));
            }
            Err(Elapsed) => {
                // Never reached the caller, so nobody will answer it.
                self.pending.remove(&token);
                return Ok(self.timed_out(&deadline));
            }
        }

        let response = match deadline.run(&mut rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Failure::stream("response sink dropped")),
            Err(Elapsed) => {
                let marked = match self.pending.get_mut(&token) {
                    Some(mut slot) => {
                        *slot = Pending::TimedOut(descriptor.clone());
                        true
                    }
                    None => false,
                };
                if marked {
                    tracing::warn!(token = %token, method = %descriptor.method, uri = %descriptor.uri, "Request timed out");
                    return Ok(self.timed_out(&deadline));
                }
                // The caller claimed the slot just before the deadline.
                match rx.await {
                    Ok(response) => response,
                    Err(_) => return Ok(self.timed_out(&deadline)),
                }
            }
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Full::new(body)))
    }

    fn timed_out(&self, deadline: &Deadline) -> Response<Full<Bytes>> {
        status_response(
            StatusCode::SERVICE_UNAVAILABLE,
            deadline.describe("request handling"),
        )
    }
}

fn status_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
}

struct ServerWorker {
    exchanges: Arc<Exchanges>,
    terminal: TerminalSignal,
    _permit: ConnectionPermit,
    _guard: ConnectionGuard,
}

impl ServerWorker {
    async fn run<Io>(self, io: Io)
    where
        Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        tracing::debug!("Connection accepted");

        let exchanges = Arc::clone(&self.exchanges);
        let service = service_fn(move |request| {
            let exchanges = Arc::clone(&exchanges);
            async move { exchanges.handle(request).await }
        });

        let connection = http1::Builder::new()
            .timer(TokioTimer::new())
            .serve_connection(TokioIo::new(io), service);
        tokio::pin!(connection);

        let requests = self.exchanges.requests.clone();
        let cancelled = requests.closed();
        tokio::pin!(cancelled);

        let mut draining = false;
        let result = loop {
            tokio::select! {
                res = connection.as_mut() => break res,
                _ = &mut cancelled, if !draining => {
                    tracing::debug!("Request stream cancelled, draining connection");
                    connection.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        };

        let failure = match result {
            Ok(()) if draining => Failure::stream("request stream cancelled"),
            Ok(()) => {
                tracing::debug!("Connection closed");
                Failure::stream("connection closed")
            }
            Err(e) => {
                let failure = Failure::stream(format!("connection error: {e}"));
                tracing::warn!(error = %failure, "Connection failed");
                metrics::record_stream_failure(Direction::Incoming, failure.kind());
                self.terminal.set(failure.clone());
                let _ = requests.send(Err(failure.clone())).await;
                failure
            }
        };

        self.terminal.set(failure);
        // Exchanges still waiting on a response can no longer be answered.
        self.exchanges
            .pending
            .retain(|_, slot| matches!(slot, Pending::TimedOut(_)));
    }
}
