//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Coordinator and connection workers produce:
//!     → logging.rs (structured log events, connection ids as fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection id flows through every worker log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
