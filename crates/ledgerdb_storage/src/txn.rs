//! Single-writer transactions.

use crate::error::{StorageError, StorageResult};
use crate::table::{Table, TxnOp};
use parking_lot::{MutexGuard, RwLockReadGuard};
use std::collections::BTreeMap;

/// Implemented by stores that can host a [`WriteTxn`].
pub(crate) trait TxnHost: Send + Sync {
    /// Committed state, as readers see it.
    fn committed(&self) -> RwLockReadGuard<'_, Table>;

    /// Makes `ops` durable and visible, all together or not at all.
    fn commit_ops(&self, ops: Vec<TxnOp>) -> StorageResult<()>;
}

/// A read-write transaction over a [`crate::KvStore`].
///
/// Mutations are staged in memory and become visible only when
/// [`commit`](Self::commit) succeeds. Only one write transaction exists per
/// store at a time; the store's writer lock is held until the transaction is
/// committed, rolled back or dropped. Dropping without committing discards
/// every staged mutation.
///
/// Readers of the store are never blocked by an open transaction and never
/// observe its staged state.
pub struct WriteTxn<'a> {
    host: &'a dyn TxnHost,
    _writer: MutexGuard<'a, ()>,
    ops: Vec<TxnOp>,
    /// Bucket existence as changed by this transaction.
    staged: BTreeMap<u64, bool>,
    finished: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(host: &'a dyn TxnHost, writer: MutexGuard<'a, ()>) -> Self {
        Self {
            host,
            _writer: writer,
            ops: Vec::new(),
            staged: BTreeMap::new(),
            finished: false,
        }
    }

    /// Returns true if `bucket` exists from this transaction's point of view.
    #[must_use]
    pub fn has_bucket(&self, bucket: u64) -> bool {
        match self.staged.get(&bucket) {
            Some(exists) => *exists,
            None => self.host.committed().has_bucket(bucket),
        }
    }

    /// Creates `bucket` unless it already exists.
    ///
    /// # Errors
    ///
    /// Infallible for the bundled stores; the `Result` keeps the signature
    /// open for stores that allocate on creation.
    pub fn create_bucket_if_not_exists(&mut self, bucket: u64) -> StorageResult<()> {
        if !self.has_bucket(bucket) {
            self.ops.push(TxnOp::CreateBucket(bucket));
            self.staged.insert(bucket, true);
        }
        Ok(())
    }

    /// Deletes `bucket` and all of its entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotFound`] if the bucket does not exist.
    pub fn delete_bucket(&mut self, bucket: u64) -> StorageResult<()> {
        if !self.has_bucket(bucket) {
            return Err(StorageError::bucket_not_found(bucket));
        }
        self.ops.push(TxnOp::DeleteBucket(bucket));
        self.staged.insert(bucket, false);
        Ok(())
    }

    /// Stages `key = value` inside `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotFound`] if the bucket does not exist.
    pub fn put(&mut self, bucket: u64, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.require_bucket(bucket)?;
        self.ops.push(TxnOp::Put {
            bucket,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Stages removal of `key` from `bucket`. Removing an absent key is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BucketNotFound`] if the bucket does not exist.
    pub fn delete(&mut self, bucket: u64, key: &[u8]) -> StorageResult<()> {
        self.require_bucket(bucket)?;
        self.ops.push(TxnOp::Delete {
            bucket,
            key: key.to_vec(),
        });
        Ok(())
    }

    /// Number of staged mutations.
    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.ops.len()
    }

    /// Commits every staged mutation atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot make the mutations durable. In
    /// that case nothing becomes visible.
    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        let ops = std::mem::take(&mut self.ops);
        if ops.is_empty() {
            return Ok(());
        }
        self.host.commit_ops(ops)
    }

    /// Discards every staged mutation.
    pub fn rollback(mut self) {
        self.finished = true;
        self.ops.clear();
    }

    fn require_bucket(&self, bucket: u64) -> StorageResult<()> {
        if self.has_bucket(bucket) {
            Ok(())
        } else {
            Err(StorageError::bucket_not_found(bucket))
        }
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.ops.is_empty() {
            tracing::debug!(ops = self.ops.len(), "write transaction dropped, rolling back");
        }
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("pending_ops", &self.ops.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
