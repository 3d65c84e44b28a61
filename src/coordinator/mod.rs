//! Connection coordinator.
//!
//! # Data Flow
//! ```text
//! CoordinatorHandle::connect / ::bind
//!     → command queue (unbounded, never blocks the caller)
//!     → command loop: resolve effective settings, spawn a setup worker
//!     → setup worker on the effective executor:
//!         connect: validate → transport connect + HTTP handshake under the
//!                  connect deadline → channel::outgoing
//!         bind:    transport listen with backlog → binding
//!     → one reply per request (resource or Failure)
//! ```
//!
//! # Design Decisions
//! - The loop only dispatches; it holds no per-connection state, so nothing it
//!   owns can be corrupted by a failing request
//! - Setup workers are independent: a slow or panicking one delays no other
//! - A worker that dies without replying surfaces as `Fault::WorkerAborted`
//! - Stopping the coordinator leaves handed-out connections and bindings open

mod handle;
mod service;

pub use handle::CoordinatorHandle;
pub use service::Coordinator;
