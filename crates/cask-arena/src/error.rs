//! Error types for arena storage operations.

use std::io;

use thiserror::Error;

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Errors that can occur during arena storage operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// No room left for another record.
    #[error("arena full")]
    Full,

    /// A flush range falling outside the mapped file.
    #[error("invalid sync range")]
    InvalidSyncRange,

    /// A record header without the record magic; the log is corrupt past
    /// this point.
    #[error("magic not found")]
    MagicNotFound,

    /// A record that does not fit its own header fields.
    #[error("short write")]
    ShortWrite,

    /// Filesystem error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}
