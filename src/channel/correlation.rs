//! Correlation tokens pairing requests with responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message paired with the token of the exchange it belongs to.
#[derive(Debug, Clone)]
pub struct Correlated<T> {
    pub token: CorrelationToken,
    pub message: T,
}

impl<T> Correlated<T> {
    pub fn new(token: CorrelationToken, message: T) -> Self {
        Self { token, message }
    }

    pub fn into_message(self) -> T {
        self.message
    }
}
