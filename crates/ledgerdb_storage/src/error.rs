//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a backend.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current backend size.
        size: u64,
    },

    /// The addressed bucket does not exist.
    #[error("bucket {bucket} not found")]
    BucketNotFound {
        /// Snapshot height of the missing bucket.
        bucket: u64,
    },

    /// A journal record failed checksum verification.
    #[error("journal checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record payload.
        actual: u32,
    },

    /// Stored bytes could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates a bucket-not-found error.
    pub fn bucket_not_found(bucket: u64) -> Self {
        Self::BucketNotFound { bucket }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true for errors that mean "nothing there" rather than failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound { .. })
    }
}
