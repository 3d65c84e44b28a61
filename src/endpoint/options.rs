//! Socket options carried by connect and bind requests.

use serde::{Deserialize, Serialize};

/// Options applied to a socket before it connects or listens.
///
/// Each option is set at most once, so the order options were added in has no
/// effect. Unset options keep the operating system default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    pub reuse_address: Option<bool>,
    pub no_delay: Option<bool>,
    pub keep_alive: Option<bool>,
    pub recv_buffer_size: Option<u32>,
    pub send_buffer_size: Option<u32>,
}

impl SocketOptions {
    pub fn reuse_address(mut self, on: bool) -> Self {
        self.reuse_address = Some(on);
        self
    }

    pub fn no_delay(mut self, on: bool) -> Self {
        self.no_delay = Some(on);
        self
    }

    pub fn keep_alive(mut self, on: bool) -> Self {
        self.keep_alive = Some(on);
        self
    }

    pub fn recv_buffer_size(mut self, bytes: u32) -> Self {
        self.recv_buffer_size = Some(bytes);
        self
    }

    pub fn send_buffer_size(mut self, bytes: u32) -> Self {
        self.send_buffer_size = Some(bytes);
        self
    }
}
