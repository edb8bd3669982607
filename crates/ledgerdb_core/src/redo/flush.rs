//! Flush operations and staged batches.

use crate::error::{CoreError, CoreResult};
use ledgerdb_codec::Batch;

/// What a flush does to one snapshot height's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FlushOpt {
    /// Replay the height's mutations into its bucket.
    Write = 1,
    /// The height was rolled back; drop its bucket.
    Rollback = 2,
    /// The height was superseded; drop its bucket.
    Cover = 3,
}

impl FlushOpt {
    /// Wire byte for this operation.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire byte.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RedoLogCorruption`] for an unknown byte.
    pub fn from_byte(byte: u8) -> CoreResult<Self> {
        match byte {
            1 => Ok(Self::Write),
            2 => Ok(Self::Rollback),
            3 => Ok(Self::Cover),
            other => Err(CoreError::redo_log_corruption(format!(
                "unknown flush operation {other}"
            ))),
        }
    }
}

/// One snapshot height staged for commit.
///
/// Carries a mutation batch exactly when the operation is
/// [`FlushOpt::Write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushingBatch {
    operation: FlushOpt,
    batch: Option<Batch>,
}

impl FlushingBatch {
    /// Stages `batch` to be replayed into the height's bucket.
    #[must_use]
    pub fn write(batch: Batch) -> Self {
        Self {
            operation: FlushOpt::Write,
            batch: Some(batch),
        }
    }

    /// Stages removal of a rolled back height.
    #[must_use]
    pub fn rollback() -> Self {
        Self {
            operation: FlushOpt::Rollback,
            batch: None,
        }
    }

    /// Stages removal of a superseded height.
    #[must_use]
    pub fn cover() -> Self {
        Self {
            operation: FlushOpt::Cover,
            batch: None,
        }
    }

    /// The staged operation.
    #[must_use]
    pub fn operation(&self) -> FlushOpt {
        self.operation
    }

    /// The mutation batch of a `Write`.
    #[must_use]
    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }
}
