//! Error types shared across the EDW workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, EdwError>;

#[derive(Error, Debug)]
pub enum EdwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content hash is not a 32 digit hex MD5
    #[error("Malformed content hash: '{0}'")]
    MalformedHash(String),

    /// Sequence number cannot be expressed as a license plate
    #[error("License plate sequence {sequence} out of range (limit {limit})")]
    OutOfRange { sequence: i64, limit: i64 },
}
