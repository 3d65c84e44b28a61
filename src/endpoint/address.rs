//! Remote endpoint addressing.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a remote address is not usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("missing host")]
    EmptyHost,

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("expected host:port, got {0:?}")]
    Malformed(String),
}

/// Host name or IP literal plus port of an outgoing connection target.
///
/// Names are resolved by the transport at connect time, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteAddress {
    host: String,
    port: u16,
}

impl RemoteAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check the address is well-formed.
    pub fn validate(&self) -> Result<(), AddressError> {
        if self.host.trim().is_empty() {
            return Err(AddressError::EmptyHost);
        }
        if self.port == 0 {
            return Err(AddressError::ZeroPort);
        }
        Ok(())
    }

    /// Value for the `Host` header of requests sent to this address.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.host_literal()
        } else {
            format!("{}:{}", self.host_literal(), self.port)
        }
    }

    fn host_literal(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_literal(), self.port)
    }
}

impl From<SocketAddr> for RemoteAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for RemoteAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::Malformed(s.to_string()))?;
        let address = Self::new(host, port);
        address.validate()?;
        Ok(address)
    }
}
