//! Channel pairs: the two flow-controlled message streams of one connection.
//!
//! # Data Flow
//! ```text
//! OutgoingConnection:  RequestSink ──▶ worker ──▶ peer
//!                      ResponseSource ◀── worker ◀── peer
//!
//! IncomingConnection:  peer ──▶ worker ──▶ RequestSource
//!                      peer ◀── worker ◀── ResponseSink
//! ```
//!
//! # Design Decisions
//! - Every direction is a bounded queue; producers wait for the consumer and
//!   never drop elements
//! - Elements are FIFO within a direction; the two directions are independent
//! - Each message carries a `CorrelationToken` pairing request and response
//! - A fatal connection error reaches both directions: the source yields it
//!   once and ends, the sink returns it from every later send

pub mod correlation;
pub mod incoming;
pub mod outgoing;
pub mod source;

pub use correlation::{Correlated, CorrelationToken};
pub use incoming::{IncomingConnection, RequestSource, ResponseSink};
pub use outgoing::{OutgoingConnection, RequestSink, ResponseSource};
pub use source::{MessageSource, SourceItem};
