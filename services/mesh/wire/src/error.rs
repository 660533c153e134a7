//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Path has no zero terminator
    #[error("path is not terminated")]
    Unterminated,

    /// Path is empty
    #[error("path is empty")]
    EmptyPath,

    /// Zero hop inside a path
    #[error("malformed path")]
    Malformed,

    /// Path exceeds the hop limit
    #[error("path too long: {0} bytes")]
    PathTooLong(usize),

    /// Not enough bytes left for a fixed-size field
    #[error("truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes available
        have: usize,
    },

    /// Unsupported advert record version
    #[error("record version unsupported: {0}")]
    Version(u16),

    /// Value does not fit a u16 length prefix
    #[error("size limit exceeded: {0}")]
    Size(usize),
}
