//! Journaled bucketed store.
//!
//! The committed table lives in memory. Durability comes from the journal:
//! each committed transaction is appended as one checksummed record (see the
//! `journal` module) and synced before the in-memory table changes, so a
//! crash at any point leaves either the whole transaction or none of it.
//!
//! ## Recovery Policy
//!
//! - **Torn tail** (fewer than a header's worth of bytes, or a verified
//!   header whose payload runs past the end of the journal): the partial
//!   record is a transaction whose commit never returned. It is truncated
//!   away and recovery proceeds.
//! - **Header or payload checksum mismatch / undecodable record**: real
//!   corruption. Opening fails rather than silently dropping committed data.
//!
//! ## Compaction
//!
//! Deleted buckets stay in the journal as dead records until it is
//! rewritten. Once a commit leaves the journal at least
//! [`FileStoreOptions::compact_min_bytes`] long and twice its size after the
//! previous compaction, the commit rewrites it as one snapshot record. The
//! journal therefore stays within a constant factor of the live data.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::journal::{decode_header, decode_payload, encode_record, FRAME_HEADER_SIZE};
use crate::store::{table_entries, table_get, KvStore};
use crate::table::{Table, TxnOp};
use crate::txn::{TxnHost, WriteTxn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Journal growth over its post-compaction size that triggers a rewrite.
const COMPACT_GROWTH_FACTOR: u64 = 2;

/// Options for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Sync the journal before acknowledging each commit.
    pub sync_on_commit: bool,
    /// Journal size below which commits never compact. Zero disables
    /// automatic compaction.
    pub compact_min_bytes: u64,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compact_min_bytes: 4 * 1024 * 1024,
        }
    }
}

/// A [`KvStore`] made durable by a transaction journal.
pub struct FileStore {
    table: RwLock<Table>,
    writer: Mutex<()>,
    journal: Mutex<Box<dyn StorageBackend>>,
    /// Journal size right after the last compaction.
    compacted_size: AtomicU64,
    path: Option<PathBuf>,
    options: FileStoreOptions,
}

impl FileStore {
    /// Opens (or creates) the journal file at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the journal is
    /// corrupted.
    pub fn open(path: &Path, options: FileStoreOptions) -> StorageResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        let mut store = Self::with_backend(Box::new(backend), options)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Builds a store over an arbitrary journal backend and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupted or cannot be read.
    pub fn with_backend(
        mut backend: Box<dyn StorageBackend>,
        options: FileStoreOptions,
    ) -> StorageResult<Self> {
        let table = replay(backend.as_mut())?;

        Ok(Self {
            table: RwLock::new(table),
            writer: Mutex::new(()),
            journal: Mutex::new(backend),
            compacted_size: AtomicU64::new(0),
            path: None,
            options,
        })
    }

    /// Returns the journal path, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the current journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn journal_size(&self) -> StorageResult<u64> {
        self.journal.lock().size()
    }

    /// Rewrites the journal as a single record holding the current table.
    ///
    /// Bucket deletions leave dead records behind; compaction drops them.
    /// File-backed stores write the snapshot to a temporary file, sync it and
    /// rename it over the journal, so a crash leaves the old or the new
    /// journal intact. Other backends are rewritten in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the new journal cannot be written.
    pub fn compact(&self) -> StorageResult<()> {
        let _writer = self.writer.lock();
        let mut journal = self.journal.lock();
        self.compact_journal(&mut journal)
    }

    fn should_compact(&self, journal_size: u64) -> bool {
        let min = self.options.compact_min_bytes;
        min > 0
            && journal_size >= min
            && journal_size
                >= self
                    .compacted_size
                    .load(Ordering::Relaxed)
                    .saturating_mul(COMPACT_GROWTH_FACTOR)
    }

    /// Rewrites the journal. Callers hold the writer and journal locks.
    fn compact_journal(&self, journal: &mut Box<dyn StorageBackend>) -> StorageResult<()> {
        let record = encode_record(&self.table.read().snapshot_ops())?;
        let before = journal.size()?;

        match &self.path {
            Some(path) => {
                let temp_path = path.with_extension("compact");
                if temp_path.exists() {
                    std::fs::remove_file(&temp_path)?;
                }
                let mut temp = FileBackend::open(&temp_path)?;
                temp.append(&record)?;
                temp.sync()?;
                drop(temp);

                std::fs::rename(&temp_path, path)?;
                *journal = Box::new(FileBackend::open(path)?);
            }
            None => {
                journal.truncate(0)?;
                journal.append(&record)?;
                journal.sync()?;
            }
        }

        self.compacted_size.store(record.len() as u64, Ordering::Relaxed);
        tracing::debug!(before, after = record.len(), "journal compacted");
        Ok(())
    }
}

impl TxnHost for FileStore {
    fn committed(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read()
    }

    fn commit_ops(&self, ops: Vec<TxnOp>) -> StorageResult<()> {
        let record = encode_record(&ops)?;
        let mut journal = self.journal.lock();
        let offset = journal.size()?;

        let written = journal.append(&record).and_then(|_| {
            if self.options.sync_on_commit {
                journal.sync()
            } else {
                Ok(())
            }
        });

        if let Err(err) = written {
            // Leave no partial record behind for the next commit to follow.
            if let Err(trunc_err) = journal.truncate(offset) {
                tracing::warn!(%trunc_err, offset, "failed to discard partial journal record");
            }
            return Err(err);
        }

        self.table.write().apply(&ops);

        let journal_size = offset + record.len() as u64;
        if self.should_compact(journal_size) {
            // The commit is already durable; a failed rewrite only delays
            // reclaiming space.
            if let Err(err) = self.compact_journal(&mut journal) {
                tracing::warn!(%err, journal_size, "journal compaction failed");
            }
        }
        Ok(())
    }
}

impl KvStore for FileStore {
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

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn replay(backend: &mut dyn StorageBackend) -> StorageResult<Table> {
    let size = backend.size()?;
    let mut table = Table::default();
    let mut offset = 0u64;
    let mut records = 0usize;

    while offset < size {
        if size - offset < FRAME_HEADER_SIZE as u64 {
            break;
        }
        let header = backend.read_at(offset, FRAME_HEADER_SIZE)?;
        let (len, crc) = decode_header(&header)?;
        let payload_start = offset + FRAME_HEADER_SIZE as u64;
        if payload_start + len as u64 > size {
            break;
        }

        let payload = backend.read_at(payload_start, len)?;
        let ops = decode_payload(&payload, crc)?;
        table.apply(&ops);

        offset = payload_start + len as u64;
        records += 1;
    }

    if offset < size {
        tracing::warn!(
            valid_bytes = offset,
            torn_bytes = size - offset,
            "discarding torn journal tail"
        );
        backend.truncate(offset)?;
    }

    tracing::info!(records, buckets = table.bucket_ids().len(), "journal replayed");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBackend, StorageError};
    use tempfile::tempdir;

    fn write_bucket(store: &FileStore, bucket: u64, key: &[u8], value: &[u8]) {
        let mut txn = store.begin_write().unwrap();
        txn.create_bucket_if_not_exists(bucket).unwrap();
        txn.put(bucket, key, value).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn reopen_replays_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");

        {
            let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
            write_bucket(&store, 1, b"a", b"1");
            write_bucket(&store, 2, b"b", b"2");

            let mut txn = store.begin_write().unwrap();
            txn.delete_bucket(1).unwrap();
            txn.commit().unwrap();
        }

        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        assert_eq!(store.buckets().unwrap(), vec![2]);
        assert_eq!(store.get(2, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn uncommitted_txn_not_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");

        {
            let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
            let mut txn = store.begin_write().unwrap();
            txn.create_bucket_if_not_exists(7).unwrap();
            txn.put(7, b"k", b"v").unwrap();
            drop(txn);
            assert_eq!(store.journal_size().unwrap(), 0);
        }

        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        assert!(store.buckets().unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_truncated() {
        let store = FileStore::with_backend(
            Box::new(InMemoryBackend::new()),
            FileStoreOptions::default(),
        )
        .unwrap();
        write_bucket(&store, 1, b"a", b"1");
        let good_len = store.journal_size().unwrap() as usize;

        let full = encode_record(&[TxnOp::CreateBucket(2)]).unwrap();
        let mut bytes = InMemoryBackend::new();
        {
            let journal = store.journal.lock();
            bytes.append(&journal.read_at(0, good_len).unwrap()).unwrap();
        }
        bytes.append(&full[..full.len() - 3]).unwrap();

        let recovered =
            FileStore::with_backend(Box::new(bytes), FileStoreOptions::default()).unwrap();
        assert_eq!(recovered.buckets().unwrap(), vec![1]);
        assert_eq!(recovered.journal_size().unwrap(), good_len as u64);
    }

    #[test]
    fn checksum_mismatch_fails_open() {
        let mut record = encode_record(&[TxnOp::CreateBucket(3)]).unwrap();
        let last = record.len() - 1;
        record[last] ^= 0xFF;

        let result = FileStore::with_backend(
            Box::new(InMemoryBackend::with_data(record)),
            FileStoreOptions::default(),
        );
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    fn journal_bytes(store: &FileStore) -> Vec<u8> {
        let journal = store.journal.lock();
        journal.read_at(0, journal.size().unwrap() as usize).unwrap()
    }

    #[test]
    fn damaged_length_in_middle_record_fails_open() {
        let store = FileStore::with_backend(
            Box::new(InMemoryBackend::new()),
            FileStoreOptions::default(),
        )
        .unwrap();
        for bucket in 1..=3 {
            write_bucket(&store, bucket, b"k", b"v");
        }

        let mut bytes = journal_bytes(&store);
        let (first_len, _) = decode_header(&bytes[..FRAME_HEADER_SIZE]).unwrap();
        let second = FRAME_HEADER_SIZE + first_len;
        // Top bit of the second record's length pushes it past the end.
        bytes[second + 3] ^= 0x80;

        let result = FileStore::with_backend(
            Box::new(InMemoryBackend::with_data(bytes)),
            FileStoreOptions::default(),
        );
        assert!(matches!(result, Err(StorageError::ChecksumMismatch { .. })));
    }

    #[test]
    fn torn_payload_after_valid_header_is_truncated() {
        let store = FileStore::with_backend(
            Box::new(InMemoryBackend::new()),
            FileStoreOptions::default(),
        )
        .unwrap();
        write_bucket(&store, 1, b"a", b"1");
        let mut bytes = journal_bytes(&store);
        let good_len = bytes.len() as u64;

        let next = encode_record(&[TxnOp::CreateBucket(2)]).unwrap();
        bytes.extend_from_slice(&next[..FRAME_HEADER_SIZE + 1]);

        let recovered = FileStore::with_backend(
            Box::new(InMemoryBackend::with_data(bytes)),
            FileStoreOptions::default(),
        )
        .unwrap();
        assert_eq!(recovered.buckets().unwrap(), vec![1]);
        assert_eq!(recovered.journal_size().unwrap(), good_len);
    }

    #[test]
    fn retention_window_keeps_journal_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");
        let options = FileStoreOptions {
            compact_min_bytes: 512,
            ..FileStoreOptions::default()
        };

        let mut largest = 0;
        {
            let store = FileStore::open(&path, options.clone()).unwrap();
            for height in 1..=300u64 {
                let mut txn = store.begin_write().unwrap();
                txn.create_bucket_if_not_exists(height).unwrap();
                txn.put(height, b"addr", &height.to_be_bytes()).unwrap();
                if height > 3 {
                    txn.delete_bucket(height - 3).unwrap();
                }
                txn.commit().unwrap();
                largest = largest.max(store.journal_size().unwrap());
            }
        }

        // 300 uncompacted records would be well over 10 KiB.
        assert!(largest < 1024, "journal reached {largest} bytes");
        assert!(!path.with_extension("compact").exists());

        let store = FileStore::open(&path, options).unwrap();
        assert_eq!(store.buckets().unwrap(), vec![298, 299, 300]);
        assert_eq!(store.get(300, b"addr").unwrap(), Some(300u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn compact_keeps_live_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");

        {
            let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
            for height in 1..=10 {
                write_bucket(&store, height, b"k", &height.to_be_bytes());
            }
            let mut txn = store.begin_write().unwrap();
            for height in 1..=8 {
                txn.delete_bucket(height).unwrap();
            }
            txn.commit().unwrap();

            let before = store.journal_size().unwrap();
            store.compact().unwrap();
            assert!(store.journal_size().unwrap() < before);

            write_bucket(&store, 11, b"k", b"after");
        }

        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        assert_eq!(store.buckets().unwrap(), vec![9, 10, 11]);
        assert_eq!(store.get(11, b"k").unwrap(), Some(b"after".to_vec()));
    }
}
