//! Journal framing for committed transactions.
//!
//! Every committed [`WriteTxn`](crate::WriteTxn) becomes one record:
//!
//! ```text
//! | payload_len (4, LE) | payload_crc (4, LE) | header_crc (4, LE) | payload (N) |
//! ```
//!
//! `header_crc` covers the first eight header bytes, so a damaged length is
//! caught before it is trusted to find the end of the record.
//!
//! The payload is `op_count (4, LE)` followed by the ops:
//!
//! ```text
//! | tag (1) | bucket (8, BE) | [key_len (4) | key] | [value_len (4) | value] |
//! ```
//!
//! Tags: 1 = create bucket, 2 = delete bucket, 3 = put, 4 = delete key.

use crate::error::{StorageError, StorageResult};
use crate::store::bucket_key;
use crate::table::TxnOp;

/// Size of the frame header.
pub(crate) const FRAME_HEADER_SIZE: usize = 12;

const HEADER_BODY_SIZE: usize = 8;

const TAG_CREATE_BUCKET: u8 = 1;
const TAG_DELETE_BUCKET: u8 = 2;
const TAG_PUT: u8 = 3;
const TAG_DELETE: u8 = 4;

/// Encodes ops into a complete framed record.
pub(crate) fn encode_record(ops: &[TxnOp]) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&len_u32(ops.len())?.to_le_bytes());

    for op in ops {
        match op {
            TxnOp::CreateBucket(bucket) => {
                payload.push(TAG_CREATE_BUCKET);
                payload.extend_from_slice(&bucket_key(*bucket));
            }
            TxnOp::DeleteBucket(bucket) => {
                payload.push(TAG_DELETE_BUCKET);
                payload.extend_from_slice(&bucket_key(*bucket));
            }
            TxnOp::Put { bucket, key, value } => {
                payload.push(TAG_PUT);
                payload.extend_from_slice(&bucket_key(*bucket));
                put_bytes(&mut payload, key)?;
                put_bytes(&mut payload, value)?;
            }
            TxnOp::Delete { bucket, key } => {
                payload.push(TAG_DELETE);
                payload.extend_from_slice(&bucket_key(*bucket));
                put_bytes(&mut payload, key)?;
            }
        }
    }

    let mut record = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    record.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    let header_crc = crc32fast::hash(&record[..HEADER_BODY_SIZE]);
    record.extend_from_slice(&header_crc.to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Verifies a frame header and splits it into `(payload_len, payload_crc)`.
///
/// # Errors
///
/// Returns [`StorageError::ChecksumMismatch`] if the header was damaged and
/// [`StorageError::Corrupted`] if it is shorter than [`FRAME_HEADER_SIZE`].
pub(crate) fn decode_header(header: &[u8]) -> StorageResult<(usize, u32)> {
    if header.len() < FRAME_HEADER_SIZE {
        return Err(StorageError::corrupted(format!(
            "journal header of {} bytes",
            header.len()
        )));
    }
    let word = |at: usize| {
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };

    let expected = word(HEADER_BODY_SIZE);
    let actual = crc32fast::hash(&header[..HEADER_BODY_SIZE]);
    if actual != expected {
        return Err(StorageError::ChecksumMismatch { expected, actual });
    }
    Ok((word(0) as usize, word(4)))
}

/// Verifies and decodes a record payload.
pub(crate) fn decode_payload(payload: &[u8], expected_crc: u32) -> StorageResult<Vec<TxnOp>> {
    let actual = crc32fast::hash(payload);
    if actual != expected_crc {
        return Err(StorageError::ChecksumMismatch {
            expected: expected_crc,
            actual,
        });
    }

    let mut cursor = Cursor { buf: payload, pos: 0 };
    let count = cursor.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));

    for _ in 0..count {
        let tag = cursor.take(1)?[0];
        let bucket = cursor.bucket()?;
        let op = match tag {
            TAG_CREATE_BUCKET => TxnOp::CreateBucket(bucket),
            TAG_DELETE_BUCKET => TxnOp::DeleteBucket(bucket),
            TAG_PUT => TxnOp::Put {
                bucket,
                key: cursor.bytes()?,
                value: cursor.bytes()?,
            },
            TAG_DELETE => TxnOp::Delete {
                bucket,
                key: cursor.bytes()?,
            },
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown journal op tag {other}"
                )))
            }
        };
        ops.push(op);
    }

    if cursor.pos != payload.len() {
        return Err(StorageError::corrupted(format!(
            "{} trailing bytes in journal record",
            payload.len() - cursor.pos
        )));
    }
    Ok(ops)
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len)
        .map_err(|_| StorageError::corrupted(format!("journal field of {len} bytes too large")))
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> StorageResult<()> {
    buf.extend_from_slice(&len_u32(bytes.len())?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        let end = self.pos.saturating_add(n);
        if end > self.buf.len() {
            return Err(StorageError::corrupted(format!(
                "journal record truncated at byte {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bucket(&mut self) -> StorageResult<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
