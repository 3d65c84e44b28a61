//! Per-request settings overrides and their resolution.
//!
//! # Responsibilities
//! - Describe which fields one request wants to change
//! - Merge an override over the process-wide defaults
//! - Pair the merged settings with the executor the connection runs on
//!
//! # Design Decisions
//! - Resolution is a pure function: defaults are borrowed, never mutated
//! - Every resolution yields a fresh owned value, nothing is shared between requests

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::schema::{ClientSettings, ServerSettings};

/// Fields of [`ClientSettings`] a single connect request may replace.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOverride {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub max_response_body_bytes: Option<usize>,
    pub stream_buffer: Option<usize>,

    /// Runtime the connection worker is spawned on.
    #[serde(skip)]
    pub executor: Option<Handle>,
}

impl ClientOverride {
    pub fn connect_timeout_ms(mut self, value: u64) -> Self {
        self.connect_timeout_ms = Some(value);
        self
    }

    pub fn request_timeout_ms(mut self, value: u64) -> Self {
        self.request_timeout_ms = Some(value);
        self
    }

    pub fn idle_timeout_ms(mut self, value: u64) -> Self {
        self.idle_timeout_ms = Some(value);
        self
    }

    pub fn max_response_body_bytes(mut self, value: usize) -> Self {
        self.max_response_body_bytes = Some(value);
        self
    }

    pub fn stream_buffer(mut self, value: usize) -> Self {
        self.stream_buffer = Some(value);
        self
    }

    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }
}

/// Fields of [`ServerSettings`] a single bind request may replace.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOverride {
    pub request_timeout_ms: Option<u64>,
    pub max_request_body_bytes: Option<usize>,
    pub max_connections: Option<usize>,
    pub stream_buffer: Option<usize>,
    pub accept_buffer: Option<usize>,

    /// Runtime the accept loop and connection workers are spawned on.
    #[serde(skip)]
    pub executor: Option<Handle>,
}

impl ServerOverride {
    pub fn request_timeout_ms(mut self, value: u64) -> Self {
        self.request_timeout_ms = Some(value);
        self
    }

    pub fn max_request_body_bytes(mut self, value: usize) -> Self {
        self.max_request_body_bytes = Some(value);
        self
    }

    pub fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = Some(value);
        self
    }

    pub fn stream_buffer(mut self, value: usize) -> Self {
        self.stream_buffer = Some(value);
        self
    }

    pub fn accept_buffer(mut self, value: usize) -> Self {
        self.accept_buffer = Some(value);
        self
    }

    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }
}

impl ClientSettings {
    /// Merge `overrides` over `self`, field by field.
    pub fn resolve(&self, overrides: Option<&ClientOverride>) -> ClientSettings {
        let Some(o) = overrides else {
            return self.clone();
        };
        ClientSettings {
            connect_timeout_ms: o.connect_timeout_ms.unwrap_or(self.connect_timeout_ms),
            request_timeout_ms: o.request_timeout_ms.unwrap_or(self.request_timeout_ms),
            idle_timeout_ms: o.idle_timeout_ms.unwrap_or(self.idle_timeout_ms),
            max_response_body_bytes: o
                .max_response_body_bytes
                .unwrap_or(self.max_response_body_bytes),
            stream_buffer: o.stream_buffer.unwrap_or(self.stream_buffer),
        }
    }
}

impl ServerSettings {
    /// Merge `overrides` over `self`, field by field.
    ///
    /// The backlog is not overridable here; it travels on the bind request itself.
    pub fn resolve(&self, overrides: Option<&ServerOverride>) -> ServerSettings {
        let Some(o) = overrides else {
            return self.clone();
        };
        ServerSettings {
            backlog: self.backlog,
            request_timeout_ms: o.request_timeout_ms.unwrap_or(self.request_timeout_ms),
            max_request_body_bytes: o
                .max_request_body_bytes
                .unwrap_or(self.max_request_body_bytes),
            max_connections: o.max_connections.unwrap_or(self.max_connections),
            stream_buffer: o.stream_buffer.unwrap_or(self.stream_buffer),
            accept_buffer: o.accept_buffer.unwrap_or(self.accept_buffer),
        }
    }
}

/// Fully resolved configuration for one connection or binding.
#[derive(Debug, Clone)]
pub struct Effective<S> {
    pub settings: S,
    pub executor: Handle,
}

impl<S> Effective<S> {
    pub fn new(settings: S, executor: Option<&Handle>, default_executor: &Handle) -> Self {
        Self {
            settings,
            executor: executor.unwrap_or(default_executor).clone(),
        }
    }
}

pub type EffectiveClientSettings = Effective<ClientSettings>;
pub type EffectiveServerSettings = Effective<ServerSettings>;
