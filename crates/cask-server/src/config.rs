//! Server configuration.

use std::net::SocketAddr;

use cask_types::MAX_BLOCK;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Read buffer size per connection.
    pub read_buffer_size: usize,
    /// Write buffer size per connection.
    pub write_buffer_size: usize,
    /// Request envelopes kept for reuse across the server.
    pub reuse_capacity: usize,
}

impl ServerConfig {
    /// The default protocol port.
    pub const DEFAULT_PORT: u16 = 17034;

    /// Creates a configuration binding the given address.
    pub fn new(bind_addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    /// Sets the per-connection read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the per-connection write buffer size.
    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets how many request envelopes are kept for reuse.
    #[must_use]
    pub fn with_reuse_capacity(mut self, capacity: usize) -> Self {
        self.reuse_capacity = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], Self::DEFAULT_PORT)),
            read_buffer_size: 8 * MAX_BLOCK,
            write_buffer_size: 8 * MAX_BLOCK,
            reuse_capacity: 64,
        }
    }
}
