//! Bucketed key/value store trait.

use crate::error::{StorageError, StorageResult};
use crate::table::Table;
use crate::txn::WriteTxn;

/// Encodes a bucket id (snapshot height) as its 8-byte big-endian key.
///
/// Big-endian keys sort in height order, which is what ordered engines
/// iterate by.
#[must_use]
pub const fn bucket_key(bucket: u64) -> [u8; 8] {
    bucket.to_be_bytes()
}

/// A durable store of buckets keyed by snapshot height.
///
/// All mutation goes through [`WriteTxn`], obtained from
/// [`begin_write`](Self::begin_write). The read methods see committed state
/// only and may run concurrently with an open write transaction.
pub trait KvStore: Send + Sync {
    /// Begins the single read-write transaction, blocking while another one
    /// is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin_write(&self) -> StorageResult<WriteTxn<'_>>;

    /// Reads `key` from `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotFound`] if the bucket does not exist.
    fn get(&self, bucket: u64, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns true if `bucket` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn has_bucket(&self, bucket: u64) -> StorageResult<bool>;

    /// Returns every entry of `bucket` in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotFound`] if the bucket does not exist.
    fn bucket_entries(&self, bucket: u64) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns the ids of every existing bucket in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn buckets(&self) -> StorageResult<Vec<u64>>;
}

pub(crate) fn table_get(table: &Table, bucket: u64, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
    table
        .bucket(bucket)
        .map(|entries| entries.get(key).cloned())
        .ok_or_else(|| StorageError::bucket_not_found(bucket))
}

pub(crate) fn table_entries(table: &Table, bucket: u64) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
    table
        .bucket(bucket)
        .map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .ok_or_else(|| StorageError::bucket_not_found(bucket))
}
