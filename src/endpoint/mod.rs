//! Endpoint descriptors.
//!
//! Immutable values describing what a caller wants opened: an outgoing
//! connection ([`ConnectRequest`]) or a listening socket ([`BindRequest`]).
//! Nothing here touches the network.

pub mod address;
pub mod options;
pub mod request;

pub use address::{AddressError, RemoteAddress};
pub use options::SocketOptions;
pub use request::{BindRequest, ConnectRequest};
