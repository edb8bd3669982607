//! Location handles.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Encoded size of a [`Location`]: file id (8) + offset (4).
pub const LOCATION_SIZE: usize = 12;

/// Position of a record inside the segment files.
///
/// `offset` is 1-based and points at the record's 4-byte length prefix;
/// offset 0 means "unset" (or "start of file" when used as a scan bound).
/// Locations order lexicographically by `(file_id, offset)`, which is also
/// write order.
///
/// The transmitted form is `file_id (8, BE) || offset (4, BE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Location {
    file_id: u64,
    offset: u32,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub const fn new(file_id: u64, offset: u32) -> Self {
        Self { file_id, offset }
    }

    /// Returns the segment file id.
    #[must_use]
    pub const fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Returns the 1-based offset inside the segment.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the 0-based byte position of the record inside its file.
    ///
    /// Offset 0 maps to byte 0.
    #[must_use]
    pub const fn byte_position(&self) -> u64 {
        self.offset.saturating_sub(1) as u64
    }

    /// Encodes the location into its fixed-width form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; LOCATION_SIZE] {
        let mut out = [0u8; LOCATION_SIZE];
        out[..8].copy_from_slice(&self.file_id.to_be_bytes());
        out[8..].copy_from_slice(&self.offset.to_be_bytes());
        out
    }

    /// Decodes a location from its fixed-width form.
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly [`LOCATION_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != LOCATION_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "location must be {LOCATION_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut file_id = [0u8; 8];
        file_id.copy_from_slice(&bytes[..8]);
        let mut offset = [0u8; 4];
        offset.copy_from_slice(&bytes[8..]);

        Ok(Self::new(u64::from_be_bytes(file_id), u32::from_be_bytes(offset)))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data{}@{}", self.file_id, self.offset)
    }
}
