//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete item was read.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to finish the current item.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// A batch op carried an unknown kind byte.
    #[error("unknown batch op kind {0}")]
    UnknownOperation(u8),

    /// A field does not fit its 4-byte length prefix.
    #[error("field of {len} bytes exceeds the 4-byte length prefix")]
    TooLarge {
        /// Length of the offending field.
        len: usize,
    },

    /// Bytes were left over after the declared content.
    #[error("{count} trailing bytes after batch")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// CBOR serialization or deserialization failed.
    #[error("CBOR error: {0}")]
    Cbor(String),
}

impl CodecError {
    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }
}
