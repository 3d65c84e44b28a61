//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! connect / exchange:
//!     → timeouts.rs (enforce connect and per-request deadlines)
//!     → on elapse: RequestTimeout failure for that operation only
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every transport call has a deadline
//! - No retries: a failed setup is reported once and retry policy stays with the caller

pub mod timeouts;

pub use timeouts::{Deadline, Elapsed};
