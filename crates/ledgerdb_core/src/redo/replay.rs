//! Applying staged batches inside a write transaction.

use super::flush::{FlushOpt, FlushingBatch};
use crate::error::CoreResult;
use ledgerdb_codec::BatchReplay;
use ledgerdb_storage::{StorageError, StorageResult, WriteTxn};

/// Replays batch mutations straight into one height's bucket.
///
/// Any storage error aborts the replay; the enclosing transaction is the
/// only recovery boundary.
pub(crate) struct BucketReplay<'t, 'a> {
    txn: &'t mut WriteTxn<'a>,
    bucket: u64,
}

impl<'t, 'a> BucketReplay<'t, 'a> {
    pub(crate) fn new(txn: &'t mut WriteTxn<'a>, bucket: u64) -> Self {
        Self { txn, bucket }
    }
}

impl BatchReplay for BucketReplay<'_, '_> {
    type Error = StorageError;

    fn put(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.txn.put(self.bucket, key, value)
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.txn.delete(self.bucket, key)
    }
}

/// Applies one staged height to `txn`.
///
/// A `Write` replays into the height's bucket, creating it if needed, and
/// then drops the bucket `retain_height` below it once `height` exceeds
/// `retain_height`. `Rollback` and `Cover` drop the height's own bucket.
/// Dropping a bucket that does not exist is a no-op.
pub(crate) fn apply_flushing_batch(
    txn: &mut WriteTxn<'_>,
    retain_height: u64,
    height: u64,
    flushing: &FlushingBatch,
) -> CoreResult<()> {
    match flushing.operation() {
        FlushOpt::Write => {
            txn.create_bucket_if_not_exists(height)?;
            if let Some(batch) = flushing.batch() {
                batch.replay(&mut BucketReplay::new(txn, height))?;
            }
            if height > retain_height {
                delete_bucket_if_exists(txn, height - retain_height)?;
            }
        }
        FlushOpt::Rollback | FlushOpt::Cover => delete_bucket_if_exists(txn, height)?,
    }
    Ok(())
}

fn delete_bucket_if_exists(txn: &mut WriteTxn<'_>, bucket: u64) -> StorageResult<()> {
    if txn.has_bucket(bucket) {
        txn.delete_bucket(bucket)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdb_codec::Batch;
    use ledgerdb_storage::{InMemoryStore, KvStore};

    fn write_one(key: &[u8], value: &[u8]) -> FlushingBatch {
        let mut batch = Batch::new();
        batch.put(key, value);
        FlushingBatch::write(batch)
    }

    #[test]
    fn write_replays_puts_and_deletes() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        let mut batch = Batch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.delete(b"a");
        apply_flushing_batch(&mut txn, 10, 5, &FlushingBatch::write(batch)).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.get(5, b"a").unwrap(), None);
        assert_eq!(store.get(5, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn write_enforces_retention() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        for height in 1..=4 {
            apply_flushing_batch(&mut txn, 2, height, &write_one(b"k", b"v")).unwrap();
        }
        txn.commit().unwrap();

        assert_eq!(store.buckets().unwrap(), vec![3, 4]);
    }

    #[test]
    fn heights_within_window_delete_nothing() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        apply_flushing_batch(&mut txn, 3, 3, &FlushingBatch::write(Batch::new())).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.buckets().unwrap(), vec![3]);
    }

    #[test]
    fn rollback_and_cover_drop_bucket() {
        let store = InMemoryStore::new();
        let mut txn = store.begin_write().unwrap();
        apply_flushing_batch(&mut txn, 100, 7, &write_one(b"k", b"v")).unwrap();
        apply_flushing_batch(&mut txn, 100, 8, &write_one(b"k", b"v")).unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin_write().unwrap();
        apply_flushing_batch(&mut txn, 100, 7, &FlushingBatch::rollback()).unwrap();
        apply_flushing_batch(&mut txn, 100, 8, &FlushingBatch::cover()).unwrap();
        // Absent buckets are fine.
        apply_flushing_batch(&mut txn, 100, 9, &FlushingBatch::rollback()).unwrap();
        txn.commit().unwrap();

        assert!(store.buckets().unwrap().is_empty());
    }
}
