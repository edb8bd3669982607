//! Mutation-set batches.
//!
//! ## Dump Format
//!
//! ```text
//! | op_count (4, BE) | op* |
//! op = | kind (1) | key_len (4, BE) | key | [value_len (4, BE) | value] |
//! ```
//!
//! `kind` is 1 for put and 0 for delete; only puts carry a value.

use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, BytesMut};

const KIND_DELETE: u8 = 0;
const KIND_PUT: u8 = 1;

/// A sink that a [`Batch`] replays its ops into, in insertion order.
pub trait BatchReplay {
    /// Error type the sink can fail with.
    type Error;

    /// Applies a put.
    ///
    /// # Errors
    ///
    /// Any error aborts the replay and is returned from [`Batch::replay`].
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Self::Error>;

    /// Applies a delete.
    ///
    /// # Errors
    ///
    /// Any error aborts the replay and is returned from [`Batch::replay`].
    fn delete(&mut self, key: &[u8]) -> Result<(), Self::Error>;
}

/// One mutation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set `key` to `value`.
    Put {
        /// Entry key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove `key`.
    Delete {
        /// Entry key.
        key: Vec<u8>,
    },
}

/// An ordered set of put/delete mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    /// Appends a delete.
    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Delete { key: key.to_vec() });
    }

    /// Number of ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Removes every op.
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    /// Iterates over the ops in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &BatchOp> {
        self.ops.iter()
    }

    /// Size of [`dump`](Self::dump)'s output in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        4 + self
            .ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
                BatchOp::Delete { key } => 1 + 4 + key.len(),
            })
            .sum::<usize>()
    }

    /// Serializes the batch.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLarge`] if a key, a value or the op count does
    /// not fit in 32 bits.
    pub fn dump(&self) -> CodecResult<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(prefix_len(self.ops.len())?);

        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    buf.put_u8(KIND_PUT);
                    buf.put_u32(prefix_len(key.len())?);
                    buf.put_slice(key);
                    buf.put_u32(prefix_len(value.len())?);
                    buf.put_slice(value);
                }
                BatchOp::Delete { key } => {
                    buf.put_u8(KIND_DELETE);
                    buf.put_u32(prefix_len(key.len())?);
                    buf.put_slice(key);
                }
            }
        }
        Ok(buf.to_vec())
    }

    /// Deserializes a batch produced by [`dump`](Self::dump).
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are truncated, carry an unknown op kind
    /// or have bytes left over.
    pub fn load(mut bytes: &[u8]) -> CodecResult<Self> {
        let count = read_u32(&mut bytes)? as usize;
        // Each op needs at least 5 bytes; cap the preallocation accordingly.
        let mut ops = Vec::with_capacity(count.min(bytes.remaining() / 5));

        for _ in 0..count {
            ensure(bytes, 1)?;
            let kind = bytes.get_u8();
            let key = read_field(&mut bytes)?;
            let op = match kind {
                KIND_PUT => BatchOp::Put {
                    key,
                    value: read_field(&mut bytes)?,
                },
                KIND_DELETE => BatchOp::Delete { key },
                other => return Err(CodecError::UnknownOperation(other)),
            };
            ops.push(op);
        }

        if bytes.has_remaining() {
            return Err(CodecError::TrailingBytes {
                count: bytes.remaining(),
            });
        }
        Ok(Self { ops })
    }

    /// Replays every op into `sink`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the sink's error.
    pub fn replay<R: BatchReplay + ?Sized>(&self, sink: &mut R) -> Result<(), R::Error> {
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => sink.put(key, value)?,
                BatchOp::Delete { key } => sink.delete(key)?,
            }
        }
        Ok(())
    }
}

pub(crate) fn prefix_len(len: usize) -> CodecResult<u32> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge { len })
}

fn ensure(bytes: &[u8], needed: usize) -> CodecResult<()> {
    if bytes.len() < needed {
        return Err(CodecError::truncated(needed, bytes.len()));
    }
    Ok(())
}

fn read_u32(bytes: &mut &[u8]) -> CodecResult<u32> {
    ensure(bytes, 4)?;
    Ok(bytes.get_u32())
}

pub(crate) fn read_field(bytes: &mut &[u8]) -> CodecResult<Vec<u8>> {
    let len = read_u32(bytes)? as usize;
    ensure(bytes, len)?;
    let field = bytes[..len].to_vec();
    bytes.advance(len);
    Ok(field)
}
