//! Server error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    /// I/O error on the listener.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
