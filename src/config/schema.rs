//! Configuration schema definitions.
//!
//! This module defines the process-wide defaults the coordinator is built with.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the connection coordinator.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Defaults for outgoing connections.
    pub client: ClientSettings,

    /// Defaults for server bindings and the connections they accept.
    pub server: ServerSettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Settings applied to one outgoing connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    /// Deadline for resolving, connecting and completing the HTTP handshake.
    pub connect_timeout_ms: u64,

    /// Deadline for one request/response exchange.
    pub request_timeout_ms: u64,

    /// Close the connection after this long without traffic (0 disables).
    pub idle_timeout_ms: u64,

    /// Largest response body buffered for the caller.
    pub max_response_body_bytes: usize,

    /// Elements buffered per stream direction before backpressure applies.
    pub stream_buffer: usize,
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `None` when idle detection is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            max_response_body_bytes: 2 * 1024 * 1024, // 2MB
            stream_buffer: 16,
        }
    }
}

/// Settings applied to one server binding.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    /// Accept backlog used when a bind request does not name one.
    pub backlog: u32,

    /// Time the caller has to answer an incoming request.
    pub request_timeout_ms: u64,

    /// Largest request body delivered to the caller.
    pub max_request_body_bytes: usize,

    /// Maximum concurrently open accepted connections (backpressure).
    pub max_connections: usize,

    /// Elements buffered per stream direction before backpressure applies.
    pub stream_buffer: usize,

    /// Accepted connections buffered before the caller pulls them.
    pub accept_buffer: usize,
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            backlog: 100,
            request_timeout_ms: 30_000,
            max_request_body_bytes: 2 * 1024 * 1024, // 2MB
            max_connections: 10_000,
            stream_buffer: 16,
            accept_buffer: 16,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            [client]
            connect_timeout_ms = 250

            [server]
            backlog = 512
            "#,
        )
        .unwrap();

        assert_eq!(config.client.connect_timeout_ms, 250);
        assert_eq!(config.client.request_timeout_ms, 30_000);
        assert_eq!(config.server.backlog, 512);
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.observability, ObservabilityConfig::default());
    }

    #[test]
    fn zero_idle_timeout_disables_idle_detection() {
        let settings = ClientSettings {
            idle_timeout_ms: 0,
            ..ClientSettings::default()
        };
        assert_eq!(settings.idle_timeout(), None);
        assert_eq!(
            ClientSettings::default().idle_timeout(),
            Some(Duration::from_secs(60))
        );
    }
}
