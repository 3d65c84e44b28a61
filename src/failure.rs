//! Failure taxonomy.
//!
//! # Kinds
//! - `BindFailed`: a listening socket could not be opened
//! - `ConnectionAttemptFailed`: an outgoing connection could not be established
//! - `RequestTimeout`: a request-scoped deadline elapsed
//! - `StreamError`: an established connection failed
//!
//! Failures are values delivered to whoever owns the affected resource. Anything
//! outside these four kinds is a [`Fault`], reported on a separate path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::CorrelationToken;
use crate::endpoint::ConnectRequest;

/// Discriminant of a [`Failure`], used for matching and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BindFailed,
    ConnectionAttemptFailed,
    RequestTimeout,
    StreamError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::BindFailed => "bind_failed",
            FailureKind::ConnectionAttemptFailed => "connection_attempt_failed",
            FailureKind::RequestTimeout => "request_timeout",
            FailureKind::StreamError => "stream_error",
        }
    }
}

/// Identifies one HTTP exchange on an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub token: CorrelationToken,
    pub method: String,
    pub uri: String,
}

/// The operation whose deadline elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", content = "request", rename_all = "snake_case")]
pub enum TimedOutRequest {
    Connect(ConnectRequest),
    Http(RequestDescriptor),
}

/// Terminal outcome of a setup or runtime operation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    #[error("bind failed")]
    BindFailed,

    #[error("connection attempt to {endpoint} failed")]
    ConnectionAttemptFailed { endpoint: String },

    #[error("request timed out: {message}")]
    RequestTimeout {
        request: Box<TimedOutRequest>,
        message: String,
    },

    #[error("stream error: {summary}")]
    StreamError { summary: String },
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::BindFailed => FailureKind::BindFailed,
            Failure::ConnectionAttemptFailed { .. } => FailureKind::ConnectionAttemptFailed,
            Failure::RequestTimeout { .. } => FailureKind::RequestTimeout,
            Failure::StreamError { .. } => FailureKind::StreamError,
        }
    }

    pub fn connection_attempt(endpoint: impl ToString) -> Self {
        Failure::ConnectionAttemptFailed {
            endpoint: endpoint.to_string(),
        }
    }

    pub fn timeout(request: TimedOutRequest, message: impl Into<String>) -> Self {
        Failure::RequestTimeout {
            request: Box::new(request),
            message: message.into(),
        }
    }

    pub fn stream(summary: impl Into<String>) -> Self {
        Failure::StreamError {
            summary: summary.into(),
        }
    }
}

/// Unexpected faults. Fatal to the affected unit of work only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("coordinator is not running")]
    CoordinatorStopped,

    #[error("worker aborted before replying")]
    WorkerAborted,
}

/// Reply error of a setup request.
#[derive(Debug, Clone, Error)]
pub enum SetupError {
    #[error(transparent)]
    Failure(#[from] Failure),

    #[error(transparent)]
    Fault(#[from] Fault),
}

impl SetupError {
    /// The taxonomy failure, if this is not an unexpected fault.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            SetupError::Failure(f) => Some(f),
            SetupError::Fault(_) => None,
        }
    }
}
