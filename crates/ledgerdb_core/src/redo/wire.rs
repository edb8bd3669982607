//! Redo record encoding and parsing.

use super::flush::{FlushOpt, FlushingBatch};
use crate::error::{CoreError, CoreResult};
use bytes::Buf;
use ledgerdb_codec::Batch;
use std::collections::BTreeMap;

const HEIGHT_SIZE: usize = 8;
const OP_SIZE: usize = 1;
const BATCH_LEN_SIZE: usize = 4;

/// Serializes staged batches, in ascending height order, into the redo
/// record wire form.
///
/// # Errors
///
/// Fails if a batch cannot be dumped or its dump exceeds `u32::MAX` bytes.
pub fn encode_redo_record(batches: &BTreeMap<u64, FlushingBatch>) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    for (height, flushing) in batches {
        out.extend_from_slice(&height.to_be_bytes());
        out.push(flushing.operation().as_byte());

        if flushing.operation() == FlushOpt::Write {
            let dump = match flushing.batch() {
                Some(batch) => batch.dump()?,
                None => Batch::new().dump()?,
            };
            let len = u32::try_from(dump.len())
                .map_err(|_| CoreError::RecordTooLarge { len: dump.len() })?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&dump);
        }
    }
    Ok(out)
}

/// Parses a whole redo record into `(height, batch)` pairs in stream order.
///
/// # Errors
///
/// Returns [`CoreError::RedoLogCorruption`] for truncated tuples or unknown
/// operations and [`CoreError::Codec`] for an undecodable batch.
pub fn decode_redo_record(bytes: &[u8]) -> CoreResult<Vec<(u64, FlushingBatch)>> {
    RedoRecordReader::new(bytes).collect()
}

/// Streaming parser over a redo record. Stops after the first error.
pub(crate) struct RedoRecordReader<'a> {
    remaining: &'a [u8],
    total: usize,
}

impl<'a> RedoRecordReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            remaining: bytes,
            total: bytes.len(),
        }
    }

    fn ensure(&self, len: usize, what: &str) -> CoreResult<()> {
        if self.remaining.remaining() < len {
            return Err(CoreError::redo_log_corruption(format!(
                "truncated {what} at byte {}: need {len}, have {}",
                self.total - self.remaining.remaining(),
                self.remaining.remaining()
            )));
        }
        Ok(())
    }

    fn read_tuple(&mut self) -> CoreResult<(u64, FlushingBatch)> {
        self.ensure(HEIGHT_SIZE, "height")?;
        let height = self.remaining.get_u64();

        self.ensure(OP_SIZE, "operation")?;
        let op = self.remaining.get_u8();
        let op = FlushOpt::from_byte(op).map_err(|_| {
            CoreError::redo_log_corruption(format!(
                "unknown flush operation {op} for height {height}"
            ))
        })?;

        let flushing = match op {
            FlushOpt::Write => {
                self.ensure(BATCH_LEN_SIZE, "batch length")?;
                let len = self.remaining.get_u32() as usize;
                self.ensure(len, "batch")?;
                let payload = &self.remaining[..len];
                self.remaining.advance(len);
                FlushingBatch::write(Batch::load(payload)?)
            }
            FlushOpt::Rollback => FlushingBatch::rollback(),
            FlushOpt::Cover => FlushingBatch::cover(),
        };
        Ok((height, flushing))
    }
}

impl Iterator for RedoRecordReader<'_> {
    type Item = CoreResult<(u64, FlushingBatch)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.remaining.has_remaining() {
            return None;
        }
        let tuple = self.read_tuple();
        if tuple.is_err() {
            self.remaining = &[];
        }
        Some(tuple)
    }
}
