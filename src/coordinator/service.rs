//! The coordinator command loop and the per-request setup workers.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::binding::{self, ServerBinding};
use crate::channel::outgoing::{self, Addresses};
use crate::channel::OutgoingConnection;
use crate::config::validation::{validate_client, validate_server};
use crate::config::{
    ClientSettings, CoordinatorConfig, Effective, EffectiveClientSettings,
    EffectiveServerSettings,
};
use crate::coordinator::handle::CoordinatorHandle;
use crate::endpoint::{BindRequest, ConnectRequest};
use crate::failure::{Failure, TimedOutRequest};
use crate::net::connection::{ConnectionTracker, Direction};
use crate::net::transport::{Connected, Transport, TransportListener};
use crate::observability::metrics::{self, Operation};
use crate::resilience::{Deadline, Elapsed};

pub(crate) enum Command {
    Connect {
        request: ConnectRequest,
        reply: oneshot::Sender<Result<OutgoingConnection, Failure>>,
    },
    Bind {
        request: BindRequest,
        reply: oneshot::Sender<Result<ServerBinding, Failure>>,
    },
}

/// Process-wide entry point for connect and bind requests.
///
/// Holds only the read-only defaults and the transport. Every request is
/// handled by its own task, so replies come back in no particular order.
pub struct Coordinator<T> {
    config: Arc<CoordinatorConfig>,
    transport: Arc<T>,
    tracker: ConnectionTracker,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(config: Arc<CoordinatorConfig>, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Start the command loop on the current runtime.
    ///
    /// Runs until every handle is dropped.
    pub fn spawn(self) -> CoordinatorHandle {
        self.start(None)
    }

    /// Start the command loop, stopping when `shutdown` fires.
    ///
    /// Connections and bindings already handed out are unaffected.
    pub fn spawn_with_shutdown(self, shutdown: broadcast::Receiver<()>) -> CoordinatorHandle {
        self.start(Some(shutdown))
    }

    fn start(self, shutdown: Option<broadcast::Receiver<()>>) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle::new(tx, self.tracker.clone());
        let executor = Handle::current();
        executor.spawn(self.run(rx, shutdown, executor.clone()));
        handle
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: Option<broadcast::Receiver<()>>,
        executor: Handle,
    ) {
        tracing::info!(
            connect_timeout_ms = self.config.client.connect_timeout_ms,
            default_backlog = self.config.server.backlog,
            "Coordinator started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command, &executor),
                    None => break,
                },
                _ = shutdown_signal(&mut shutdown) => {
                    tracing::info!("Coordinator received shutdown signal");
                    break;
                }
            }
        }

        tracing::info!("Coordinator stopped");
    }

    fn dispatch(&self, command: Command, executor: &Handle) {
        match command {
            Command::Connect { request, reply } => {
                let effective = self.resolve_client(&request, executor);
                let setup = Setup {
                    transport: Arc::clone(&self.transport),
                    tracker: self.tracker.clone(),
                };
                let span = tracing::debug_span!("connect", remote = %request.remote);
                effective.executor.clone().spawn(
                    async move {
                        let start = Instant::now();
                        let result = setup.connect(request, effective).await;
                        metrics::record_setup(
                            Operation::Connect,
                            result.as_ref().err().map(Failure::kind),
                            start,
                        );
                        if reply.send(result).is_err() {
                            tracing::debug!("Requester went away, dropping connect reply");
                        }
                    }
                    .instrument(span),
                );
            }
            Command::Bind { request, reply } => {
                let effective = self.resolve_server(&request, executor);
                let backlog = request.backlog.unwrap_or(self.config.server.backlog);
                let setup = Setup {
                    transport: Arc::clone(&self.transport),
                    tracker: self.tracker.clone(),
                };
                let span = tracing::debug_span!("bind", endpoint = %request.endpoint, backlog);
                effective.executor.clone().spawn(
                    async move {
                        let start = Instant::now();
                        let result = setup.bind(request, backlog, effective).await;
                        metrics::record_setup(
                            Operation::Bind,
                            result.as_ref().err().map(Failure::kind),
                            start,
                        );
                        if reply.send(result).is_err() {
                            tracing::debug!("Requester went away, releasing unclaimed binding");
                        }
                    }
                    .instrument(span),
                );
            }
        }
    }

    fn resolve_client(&self, request: &ConnectRequest, executor: &Handle) -> EffectiveClientSettings {
        let overrides = request.settings.as_ref();
        let resolved = self.config.client.resolve(overrides);
        let settings = ClientSettings {
            stream_buffer: request.stream_buffer.unwrap_or(resolved.stream_buffer),
            ..resolved
        };
        Effective::new(
            settings,
            overrides.and_then(|o| o.executor.as_ref()),
            executor,
        )
    }

    fn resolve_server(&self, request: &BindRequest, executor: &Handle) -> EffectiveServerSettings {
        let overrides = request.settings.as_ref();
        Effective::new(
            self.config.server.resolve(overrides),
            overrides.and_then(|o| o.executor.as_ref()),
            executor,
        )
    }
}

/// Resolves when shutdown is requested. Never resolves without a receiver or
/// once the sender is gone.
async fn shutdown_signal(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => match rx.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Performs one setup request.
struct Setup<T> {
    transport: Arc<T>,
    tracker: ConnectionTracker,
}

impl<T: Transport> Setup<T> {
    async fn connect(
        &self,
        request: ConnectRequest,
        effective: EffectiveClientSettings,
    ) -> Result<OutgoingConnection, Failure> {
        if let Err(e) = request.remote.validate() {
            tracing::warn!(remote = %request.remote, error = %e, "Rejected malformed remote address");
            return Err(Failure::connection_attempt(&request.remote));
        }
        if let Err(errors) = validate_client(&effective.settings) {
            tracing::warn!(remote = %request.remote, ?errors, "Rejected invalid connection settings");
            return Err(Failure::connection_attempt(&request.remote));
        }

        let deadline = Deadline::after(effective.settings.connect_timeout());
        let attempt = async {
            let Connected {
                io,
                local_addr,
                remote_addr,
            } = self.transport.open_connection(&request).await.map_err(|e| {
                tracing::warn!(remote = %request.remote, error = %e, "Connection attempt failed");
                Failure::connection_attempt(&request.remote)
            })?;

            let (sender, connection) = outgoing::handshake(io).await.map_err(|e| {
                tracing::warn!(remote = %request.remote, error = %e, "HTTP handshake failed");
                Failure::connection_attempt(&request.remote)
            })?;

            let addresses = Addresses {
                local: local_addr,
                remote: remote_addr,
            };
            Ok::<_, Failure>((sender, connection, addresses))
        };

        match deadline.run(attempt).await {
            Ok(Ok((sender, connection, addresses))) => {
                let guard = self.tracker.track(Direction::Outgoing);
                tracing::debug!(
                    connection_id = %guard.id(),
                    local_addr = %addresses.local,
                    remote_addr = %addresses.remote,
                    "Connected"
                );
                Ok(outgoing::start(
                    sender,
                    connection,
                    addresses,
                    request.remote,
                    effective,
                    guard,
                ))
            }
            Ok(Err(failure)) => Err(failure),
            Err(Elapsed) => {
                let message = deadline.describe(&format!("connect to {}", request.remote));
                tracing::warn!(remote = %request.remote, %message, "Connect timed out");
                Err(Failure::timeout(TimedOutRequest::Connect(request), message))
            }
        }
    }

    async fn bind(
        &self,
        request: BindRequest,
        backlog: u32,
        effective: EffectiveServerSettings,
    ) -> Result<ServerBinding, Failure> {
        if let Err(errors) = validate_server(&effective.settings) {
            tracing::warn!(endpoint = %request.endpoint, ?errors, "Rejected invalid binding settings");
            return Err(Failure::BindFailed);
        }

        let listener = self
            .transport
            .open_listener(request.endpoint, backlog, &request.options)
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %request.endpoint, error = %e, "Bind failed");
                Failure::BindFailed
            })?;

        let local_addr = listener.local_addr().map_err(|e| {
            tracing::warn!(endpoint = %request.endpoint, error = %e, "Bound socket has no local address");
            Failure::BindFailed
        })?;

        tracing::info!(address = %local_addr, backlog, "Listener bound");
        Ok(binding::start(
            listener,
            local_addr,
            effective,
            self.tracker.clone(),
        ))
    }
}
