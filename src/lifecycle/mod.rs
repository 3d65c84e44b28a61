//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → coordinator stops taking requests
//!               → bindings released by their owners
//!     drain: wait for live connections, bounded by a grace period
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, drain, exit
//! - Shutdown has a deadline: connections still open after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::{drain, Shutdown};
pub use signals::{spawn_signal_listener, wait_for_signal};
