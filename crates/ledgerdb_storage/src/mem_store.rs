//! In-memory bucketed store.

use crate::error::StorageResult;
use crate::store::{table_entries, table_get, KvStore};
use crate::table::{Table, TxnOp};
use crate::txn::{TxnHost, WriteTxn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

/// A [`KvStore`] that keeps everything in memory.
///
/// Commits are atomic with respect to readers: the whole op list is applied
/// under one write lock. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    table: RwLock<Table>,
    writer: Mutex<()>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TxnHost for InMemoryStore {
    fn committed(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read()
    }

    fn commit_ops(&self, ops: Vec<TxnOp>) -> StorageResult<()> {
        self.table.write().apply(&ops);
        Ok(())
    }
}

impl KvStore for InMemoryStore {
    fn begin_write(&self) -> StorageResult<WriteTxn<'_>> {
        Ok(WriteTxn::new(self, self.writer.lock()))
    }

    fn get(&self, bucket: u64, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        table_get(&self.table.read(), bucket, key)
    }

    fn has_bucket(&self, bucket: u64) -> StorageResult<bool> {
        Ok(self.table.read().has_bucket(bucket))
    }

    fn bucket_entries(&self, bucket: u64) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        table_entries(&self.table.read(), bucket)
    }

    fn buckets(&self) -> StorageResult<Vec<u64>> {
        Ok(self.table.read().bucket_ids())
    }
}
