//! Client error types.

use std::io;

use cask_wire::WireError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure while connecting or during the handshake.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Wire protocol failure (banner rejection, packing).
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The server answered with `Rerror`; the message is the `ename`
    /// string verbatim.
    #[error("{0}")]
    Remote(String),

    /// The reply id did not pair with the request id.
    #[error("invalid response")]
    InvalidResponse,

    /// The connection died; every request pending at that moment fails
    /// with the terminal error.
    #[error("connection error: {0}")]
    Connection(String),
}
