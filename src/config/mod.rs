//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CoordinatorConfig (validated, immutable)
//!     → shared via Arc with the coordinator
//!
//! Per request:
//!     ConnectRequest / BindRequest override
//!     → overrides.rs (merge over defaults)
//!     → Effective<ClientSettings | ServerSettings>
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;

pub use overrides::{
    ClientOverride, Effective, EffectiveClientSettings, EffectiveServerSettings, ServerOverride,
};
pub use schema::{ClientSettings, CoordinatorConfig, ObservabilityConfig, ServerSettings};
