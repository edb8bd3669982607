//! Test fixtures and store helpers.
//!
//! Provides temporary segment stores, durable stores and redo logs that
//! clean up after themselves.

use crate::generators::AccountChange;
use ledgerdb_core::{Config, RedoLog, SegmentStore};
use ledgerdb_storage::{FileStore, FileStoreOptions, InMemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Configuration with small segments and no directory lock, so rotation
/// shows up after a handful of writes.
pub fn small_segment_config(max_segment_size: u64) -> Config {
    Config::new()
        .max_segment_size(max_segment_size)
        .lock_directory(false)
}

/// A segment store in a temporary directory.
pub struct TestSegments {
    /// The store instance.
    pub store: SegmentStore,
    config: Config,
    temp_dir: TempDir,
}

impl TestSegments {
    /// Opens a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::new().lock_directory(false))
    }

    /// Opens a store with `config`.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = SegmentStore::open(temp_dir.path().join("blocks"), &config)
            .expect("Failed to open segment store");
        Self {
            store,
            config,
            temp_dir,
        }
    }

    /// Directory holding the segments.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().join("blocks")
    }

    /// Closes and reopens the store over the same directory.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            config,
            temp_dir,
        } = self;
        store.close().expect("Failed to close segment store");
        let store = SegmentStore::open(temp_dir.path().join("blocks"), &config)
            .expect("Failed to reopen segment store");
        Self {
            store,
            config,
            temp_dir,
        }
    }
}

impl Default for TestSegments {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSegments {
    type Target = SegmentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary segment store.
///
/// # Example
///
/// ```rust
/// use ledgerdb_testkit::with_temp_segments;
///
/// with_temp_segments(|segments| {
///     segments.write(b"genesis").unwrap();
/// });
/// ```
pub fn with_temp_segments<F, R>(f: F) -> R
where
    F: FnOnce(&SegmentStore) -> R,
{
    let segments = TestSegments::new();
    f(&segments.store)
}

/// A redo log over an in-memory store, with a handle on the store.
pub fn memory_redo(
    retain_height: u64,
    current_height: u64,
) -> (Arc<InMemoryStore>, RedoLog<AccountChange, InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let redo = RedoLog::new(Arc::clone(&store), retain_height, current_height);
    (store, redo)
}

/// Opens a journaled store at `path`.
pub fn open_file_store(path: &Path) -> Arc<FileStore> {
    Arc::new(FileStore::open(path, FileStoreOptions::default()).expect("Failed to open file store"))
}

/// A node's persistence in one temporary directory: the block segments and
/// the journaled redo store.
pub struct TestNode {
    /// Block segments.
    pub segments: SegmentStore,
    /// Durable redo store.
    pub store: Arc<FileStore>,
    config: Config,
    temp_dir: TempDir,
}

impl TestNode {
    /// Creates a node with `config`.
    pub fn new(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let segments = SegmentStore::open(temp_dir.path().join("blocks"), &config)
            .expect("Failed to open segment store");
        let store = open_file_store(&temp_dir.path().join("redo.journal"));
        Self {
            segments,
            store,
            config,
            temp_dir,
        }
    }

    /// A redo log over the node's store using the configured retention.
    pub fn redo(&self, current_height: u64) -> RedoLog<AccountChange, FileStore> {
        RedoLog::with_config(Arc::clone(&self.store), &self.config, current_height)
    }

    /// Drops every open handle and reopens both stores from disk, as a
    /// restarted node would.
    pub fn restart(self) -> Self {
        let Self {
            segments,
            store,
            config,
            temp_dir,
        } = self;
        drop(segments);
        drop(store);

        let segments = SegmentStore::open(temp_dir.path().join("blocks"), &config)
            .expect("Failed to reopen segment store");
        let store = open_file_store(&temp_dir.path().join("redo.journal"));
        Self {
            segments,
            store,
            config,
            temp_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdb_storage::KvStore;

    #[test]
    fn segments_survive_reopen() {
        let segments = TestSegments::with_config(small_segment_config(64));
        let loc = segments.write(b"block").unwrap();

        let segments = segments.reopen();
        assert_eq!(segments.read(loc).unwrap(), b"block");
        assert!(segments.path().join("data1").exists());
    }

    #[test]
    fn node_restart_keeps_both_stores() {
        let node = TestNode::new(small_segment_config(1024));
        let loc = node.segments.write(b"block 1").unwrap();
        let mut redo = node.redo(1);
        redo.add_log(b"alice", AccountChange::balance("VITE", 5));
        redo.set_current_height(2);
        redo.prepare().unwrap();
        redo.commit().unwrap();
        drop(redo);

        let node = node.restart();
        assert_eq!(node.segments.read(loc).unwrap(), b"block 1");
        assert!(node.store.has_bucket(1).unwrap());
    }
}
