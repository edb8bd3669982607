//! Committed bucket state shared by the store implementations.

use std::collections::BTreeMap;

/// Entries of one bucket, ordered by key.
pub(crate) type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;

/// A single staged mutation inside a write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxnOp {
    CreateBucket(u64),
    DeleteBucket(u64),
    Put {
        bucket: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: u64,
        key: Vec<u8>,
    },
}

/// All committed buckets, keyed by snapshot height.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Table {
    buckets: BTreeMap<u64, Bucket>,
}

impl Table {
    /// Applies ops in order. Ops were validated while staged, so a put into
    /// a missing bucket cannot occur here.
    pub(crate) fn apply(&mut self, ops: &[TxnOp]) {
        for op in ops {
            match op {
                TxnOp::CreateBucket(bucket) => {
                    self.buckets.entry(*bucket).or_default();
                }
                TxnOp::DeleteBucket(bucket) => {
                    self.buckets.remove(bucket);
                }
                TxnOp::Put { bucket, key, value } => {
                    if let Some(entries) = self.buckets.get_mut(bucket) {
                        entries.insert(key.clone(), value.clone());
                    }
                }
                TxnOp::Delete { bucket, key } => {
                    if let Some(entries) = self.buckets.get_mut(bucket) {
                        entries.remove(key);
                    }
                }
            }
        }
    }

    pub(crate) fn has_bucket(&self, bucket: u64) -> bool {
        self.buckets.contains_key(&bucket)
    }

    pub(crate) fn bucket(&self, bucket: u64) -> Option<&Bucket> {
        self.buckets.get(&bucket)
    }

    pub(crate) fn bucket_ids(&self) -> Vec<u64> {
        self.buckets.keys().copied().collect()
    }

    /// Ops that rebuild this table from empty.
    pub(crate) fn snapshot_ops(&self) -> Vec<TxnOp> {
        let mut ops = Vec::new();
        for (bucket, entries) in &self.buckets {
            ops.push(TxnOp::CreateBucket(*bucket));
            ops.extend(entries.iter().map(|(key, value)| TxnOp::Put {
                bucket: *bucket,
                key: key.clone(),
                value: value.clone(),
            }));
        }
        ops
    }
}
