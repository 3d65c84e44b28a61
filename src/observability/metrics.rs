//! Metrics collection and exposition.
//!
//! # Metrics
//! - `coordinator_setup_total` (counter): setup requests by operation, outcome
//! - `coordinator_setup_duration_seconds` (histogram): time to reply
//! - `coordinator_open_connections` (gauge): live connections by direction
//! - `coordinator_stream_failures_total` (counter): failures on established channels
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::failure::FailureKind;
use crate::net::connection::Direction;

/// Which setup command a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Bind,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Bind => "bind",
        }
    }
}

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

/// Record the reply to one setup request. `None` means success.
pub fn record_setup(operation: Operation, failure: Option<FailureKind>, start: Instant) {
    let outcome = failure.map_or("ok", |kind| kind.as_str());
    counter!(
        "coordinator_setup_total",
        "operation" => operation.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "coordinator_setup_duration_seconds",
        "operation" => operation.as_str()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn connection_opened(direction: Direction) {
    gauge!("coordinator_open_connections", "direction" => direction.as_str()).increment(1.0);
}

pub fn connection_closed(direction: Direction) {
    gauge!("coordinator_open_connections", "direction" => direction.as_str()).decrement(1.0);
}

pub fn record_stream_failure(direction: Direction, kind: FailureKind) {
    counter!(
        "coordinator_stream_failures_total",
        "direction" => direction.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}
