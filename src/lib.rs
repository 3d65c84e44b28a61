//! Connection-lifecycle coordinator library.
//!
//! Establishes outgoing HTTP/1.1 connections and opens listening server
//! bindings on request, handing each caller a pair of flow-controlled
//! message streams per connection.

pub mod binding;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod failure;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use binding::{BindingRelease, IncomingConnections, ServerBinding};
pub use channel::{
    CorrelationToken, IncomingConnection, OutgoingConnection, RequestSink, ResponseSink,
};
pub use config::{ClientOverride, CoordinatorConfig, ServerOverride};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use endpoint::{BindRequest, ConnectRequest, RemoteAddress, SocketOptions};
pub use failure::{Failure, FailureKind, Fault, SetupError};
pub use lifecycle::Shutdown;
pub use net::TcpTransport;
