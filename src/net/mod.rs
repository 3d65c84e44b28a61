//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! connect:
//!     transport.rs (resolve, socket options, TCP connect)
//!     → connection.rs (id, live-connection tracking)
//!     → hand off to the channel layer
//!
//! bind:
//!     transport.rs (socket options, bind, listen with backlog)
//!     → listener.rs (accept with connection limits)
//!     → connection.rs (id, live-connection tracking)
//!     → hand off to the channel layer
//! ```
//!
//! # Design Decisions
//! - Bounded accepts prevent resource exhaustion; excess peers wait in the OS backlog
//! - Each connection is counted until its worker exits

pub mod connection;
pub mod listener;
pub mod transport;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, Direction};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use transport::{Connected, TcpAcceptor, TcpTransport, Transport, TransportListener};
