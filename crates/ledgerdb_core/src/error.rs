//! Error types for LedgerDB core.

use crate::location::Location;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in LedgerDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Durable store error.
    #[error("storage error: {0}")]
    Storage(#[from] ledgerdb_storage::StorageError),

    /// Batch or redo entry codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ledgerdb_codec::CodecError),

    /// I/O error on a segment file or directory.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What was being done, naming the file and offset involved.
        context: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The addressed segment file does not exist.
    #[error("segment data{file_id} not found")]
    SegmentNotFound {
        /// Id of the missing segment.
        file_id: u64,
    },

    /// A location does not address a record.
    #[error("invalid location {location}: {reason}")]
    InvalidLocation {
        /// The offending location.
        location: Location,
        /// Why it is invalid.
        reason: String,
    },

    /// A record is too large for its 4-byte length prefix.
    #[error("record of {len} bytes exceeds the 4-byte length prefix")]
    RecordTooLarge {
        /// Length of the record.
        len: usize,
    },

    /// A segment record could not be parsed out of a byte stream.
    #[error("segment record corruption: {message}")]
    RecordCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A redo record could not be parsed.
    #[error("redo log corruption: {message}")]
    RedoLogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },

    /// Another process holds the segment directory lock.
    #[error("segment directory {} is locked by another process", path.display())]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },
}

impl CoreError {
    /// Creates an I/O error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a segment-not-found error.
    pub fn segment_not_found(file_id: u64) -> Self {
        Self::SegmentNotFound { file_id }
    }

    /// Creates an invalid location error.
    pub fn invalid_location(location: Location, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            location,
            reason: reason.into(),
        }
    }

    /// Creates a record corruption error.
    pub fn record_corruption(message: impl Into<String>) -> Self {
        Self::RecordCorruption {
            message: message.into(),
        }
    }

    /// Creates a redo log corruption error.
    pub fn redo_log_corruption(message: impl Into<String>) -> Self {
        Self::RedoLogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for "nothing to read/delete" errors: missing segments,
    /// locations past the data, and missing buckets.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SegmentNotFound { .. } | Self::InvalidLocation { .. } => true,
            Self::Storage(err) => err.is_not_found(),
            _ => false,
        }
    }
}
