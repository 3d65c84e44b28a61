//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffers and limits within
//!   `1..=MAX_QUEUE`, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoordinatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, and again on the
//!   effective settings of every request, since overrides bypass the loader

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::{ClientSettings, CoordinatorConfig, ServerSettings};

/// Largest queue depth or connection limit tokio's primitives accept.
pub const MAX_QUEUE: usize = Semaphore::MAX_PERMITS;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not exceed {max}")]
    TooLarge { field: &'static str, max: usize },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &CoordinatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    errors.extend(client_errors(&config.client));
    errors.extend(server_errors(&config.server));

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    into_result(errors)
}

/// Check the effective settings of one connect request.
pub fn validate_client(settings: &ClientSettings) -> Result<(), Vec<ValidationError>> {
    into_result(client_errors(settings))
}

/// Check the effective settings of one bind request.
pub fn validate_server(settings: &ServerSettings) -> Result<(), Vec<ValidationError>> {
    into_result(server_errors(settings))
}

fn client_errors(settings: &ClientSettings) -> Vec<ValidationError> {
    let mut errors = non_zero(&[
        ("client.connect_timeout_ms", settings.connect_timeout_ms),
        ("client.request_timeout_ms", settings.request_timeout_ms),
        (
            "client.max_response_body_bytes",
            settings.max_response_body_bytes as u64,
        ),
    ]);
    errors.extend(queue_sizes(&[("client.stream_buffer", settings.stream_buffer)]));
    errors
}

fn server_errors(settings: &ServerSettings) -> Vec<ValidationError> {
    let mut errors = non_zero(&[("server.request_timeout_ms", settings.request_timeout_ms)]);
    errors.extend(queue_sizes(&[
        ("server.max_connections", settings.max_connections),
        ("server.stream_buffer", settings.stream_buffer),
        ("server.accept_buffer", settings.accept_buffer),
    ]));
    errors
}

fn non_zero(fields: &[(&'static str, u64)]) -> Vec<ValidationError> {
    fields
        .iter()
        .filter(|(_, value)| *value == 0)
        .map(|&(field, _)| ValidationError::Zero { field })
        .collect()
}

fn queue_sizes(fields: &[(&'static str, usize)]) -> Vec<ValidationError> {
    fields
        .iter()
        .filter_map(|&(field, value)| match value {
            0 => Some(ValidationError::Zero { field }),
            v if v > MAX_QUEUE => Some(ValidationError::TooLarge {
                field,
                max: MAX_QUEUE,
            }),
            _ => None,
        })
        .collect()
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
