//! Per-height accumulation of redo entries.

use super::flush::{FlushOpt, FlushingBatch};
use ledgerdb_codec::{encode_entries, Batch, CodecResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Redo entries recorded for one snapshot height, grouped by address.
///
/// Addresses are kept sorted so that the same log always produces the same
/// batch bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotLog<E> {
    flush_opt: FlushOpt,
    logs: BTreeMap<Vec<u8>, Vec<E>>,
}

impl<E> Default for SnapshotLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SnapshotLog<E> {
    /// Creates an empty log marked [`FlushOpt::Write`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            flush_opt: FlushOpt::Write,
            logs: BTreeMap::new(),
        }
    }

    /// Operation the next flush applies to this height.
    #[must_use]
    pub fn flush_opt(&self) -> FlushOpt {
        self.flush_opt
    }

    /// Entries by address.
    #[must_use]
    pub fn logs(&self) -> &BTreeMap<Vec<u8>, Vec<E>> {
        &self.logs
    }

    /// Returns true if no entries have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub(crate) fn push(&mut self, address: &[u8], entry: E) {
        self.logs.entry(address.to_vec()).or_default().push(entry);
    }

    pub(crate) fn mark_rollback(&mut self) {
        self.logs.clear();
        self.flush_opt = FlushOpt::Rollback;
    }

    pub(crate) fn mark_cover(&mut self) {
        self.flush_opt = FlushOpt::Cover;
    }

    pub(crate) fn mark_write(&mut self) {
        self.flush_opt = FlushOpt::Write;
    }
}

impl<E: Serialize> SnapshotLog<E> {
    /// Builds the batch this log flushes as: one `put` per address whose
    /// value is the address's entries, length-delimited in order.
    pub(crate) fn to_flushing_batch(&self) -> CodecResult<FlushingBatch> {
        match self.flush_opt {
            FlushOpt::Write => {
                let mut batch = Batch::new();
                for (address, entries) in &self.logs {
                    batch.put(address, &encode_entries(entries)?);
                }
                Ok(FlushingBatch::write(batch))
            }
            FlushOpt::Rollback => Ok(FlushingBatch::rollback()),
            FlushOpt::Cover => Ok(FlushingBatch::cover()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdb_codec::{decode_entries, BatchOp};

    #[test]
    fn groups_entries_by_address() {
        let mut log = SnapshotLog::new();
        log.push(b"bob", 3u64);
        log.push(b"alice", 1u64);
        log.push(b"alice", 2u64);

        assert_eq!(log.logs()[b"alice".as_slice()], vec![1, 2]);
        assert_eq!(log.logs().keys().next().unwrap(), b"alice");
    }

    #[test]
    fn write_batch_encodes_entries() {
        let mut log = SnapshotLog::new();
        log.push(b"alice", "first".to_string());
        log.push(b"alice", "second".to_string());

        let flushing = log.to_flushing_batch().unwrap();
        let ops: Vec<&BatchOp> = flushing.batch().unwrap().iter().collect();
        assert_eq!(ops.len(), 1);
        let BatchOp::Put { key, value } = ops[0] else {
            panic!("expected a put");
        };
        assert_eq!(key, b"alice");
        assert_eq!(
            decode_entries::<String>(value).unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn rollback_drops_entries() {
        let mut log = SnapshotLog::new();
        log.push(b"alice", 1u32);
        log.mark_rollback();

        assert!(log.is_empty());
        assert_eq!(log.flush_opt(), FlushOpt::Rollback);
        assert!(log.to_flushing_batch().unwrap().batch().is_none());
    }

    #[test]
    fn cover_keeps_entries() {
        let mut log = SnapshotLog::new();
        log.push(b"alice", 1u32);
        log.mark_cover();

        assert!(!log.is_empty());
        assert_eq!(log.to_flushing_batch().unwrap().operation(), FlushOpt::Cover);

        log.mark_write();
        assert_eq!(log.flush_opt(), FlushOpt::Write);
    }
}
