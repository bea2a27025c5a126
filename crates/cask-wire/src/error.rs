//! Wire protocol error types.

use std::io;

use thiserror::Error;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur during wire protocol operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// Malformed message: unknown id, short body, or trailing bytes.
    #[error("invalid packet")]
    Packet,

    /// A block type outside the wire translation tables.
    #[error("invalid block type")]
    BlockType,

    /// The destination buffer cannot hold the packed frame.
    ///
    /// Batch writers treat this as "flush and retry".
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// A frame whose size field exceeds the protocol maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The peer's banner line was rejected.
    #[error("banner rejected: {0:?}")]
    Banner(String),

    /// I/O error during the banner exchange.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
