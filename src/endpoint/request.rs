//! Connect and bind request descriptors.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::{ClientOverride, ServerOverride};
use crate::endpoint::address::RemoteAddress;
use crate::endpoint::options::SocketOptions;

/// Intent to open one outgoing connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub remote: RemoteAddress,
    pub local: Option<SocketAddr>,
    #[serde(default)]
    pub options: SocketOptions,
    #[serde(default)]
    pub settings: Option<ClientOverride>,
    /// Replaces the resolved `stream_buffer` for this connection only.
    #[serde(default)]
    pub stream_buffer: Option<usize>,
}

impl ConnectRequest {
    pub fn new(remote: RemoteAddress) -> Self {
        Self {
            remote,
            local: None,
            options: SocketOptions::default(),
            settings: None,
            stream_buffer: None,
        }
    }

    pub fn local_address(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }

    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(mut self, settings: ClientOverride) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn stream_buffer(mut self, elements: usize) -> Self {
        self.stream_buffer = Some(elements);
        self
    }
}

/// Intent to open one listening socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindRequest {
    pub endpoint: SocketAddr,
    /// `None` uses the configured default backlog.
    #[serde(default)]
    pub backlog: Option<u32>,
    #[serde(default)]
    pub options: SocketOptions,
    #[serde(default)]
    pub settings: Option<ServerOverride>,
}

impl BindRequest {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            backlog: None,
            options: SocketOptions::default(),
            settings: None,
        }
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(mut self, settings: ServerOverride) -> Self {
        self.settings = Some(settings);
        self
    }
}
