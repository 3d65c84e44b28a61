//! Caller-side handle onto a running coordinator.

use tokio::sync::{mpsc, oneshot};

use crate::binding::ServerBinding;
use crate::channel::OutgoingConnection;
use crate::coordinator::service::Command;
use crate::endpoint::{BindRequest, ConnectRequest};
use crate::failure::{Failure, Fault, SetupError};
use crate::net::connection::ConnectionTracker;

/// Submits connect and bind requests. Cheap to clone.
///
/// Each request gets exactly one reply: the established resource, a
/// [`Failure`], or a [`Fault`] when no reply could be produced.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    tracker: ConnectionTracker,
}

impl CoordinatorHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, tracker: ConnectionTracker) -> Self {
        Self { commands, tracker }
    }

    /// Establish an outgoing HTTP/1.1 connection.
    pub async fn connect(&self, request: ConnectRequest) -> Result<OutgoingConnection, SetupError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Connect { request, reply })?;
        self.await_reply(rx).await
    }

    /// Open a listening socket.
    pub async fn bind(&self, request: BindRequest) -> Result<ServerBinding, SetupError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Bind { request, reply })?;
        self.await_reply(rx).await
    }

    /// Connections currently open in either direction.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Live-connection counter shared with every connection worker.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// True once the coordinator no longer accepts requests.
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    fn submit(&self, command: Command) -> Result<(), Fault> {
        self.commands
            .send(command)
            .map_err(|_| Fault::CoordinatorStopped)
    }

    async fn await_reply<R>(
        &self,
        rx: oneshot::Receiver<Result<R, Failure>>,
    ) -> Result<R, SetupError> {
        match rx.await {
            Ok(result) => result.map_err(SetupError::from),
            // The command was dropped unanswered: either the loop stopped
            // before dispatching it or its worker died.
            Err(_) if self.commands.is_closed() => Err(Fault::CoordinatorStopped.into()),
            Err(_) => {
                tracing::error!("Setup worker aborted without a reply");
                Err(Fault::WorkerAborted.into())
            }
        }
    }
}
