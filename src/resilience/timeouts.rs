//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound connect attempts and individual exchanges by a deadline
//! - Share one deadline across several awaits of the same operation
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - An elapsed deadline cancels only the wrapped future

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

/// Marker for an elapsed [`Deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// A fixed point in time an operation must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `fut` until it completes or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        time::timeout_at(self.at, fut).await.map_err(|_| Elapsed)
    }

    /// Human-readable description used in timeout failures.
    pub fn describe(&self, what: &str) -> String {
        format!("{what} did not complete within {}ms", self.budget.as_millis())
    }
}
