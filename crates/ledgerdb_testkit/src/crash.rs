//! Crash simulation for durable-store atomicity tests.
//!
//! [`CrashableBackend`] wraps the journal backend of a
//! [`ledgerdb_storage::FileStore`]. Once its [`CrashSwitch`] trips, the
//! backend behaves like a dead process: the write that tripped it may land
//! partially, and every later append, sync or truncate fails. Reopening the
//! journal file then shows exactly what a restarted node would see.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let switch = CrashSwitch::new();
//! let backend = CrashableBackend::new(Box::new(FileBackend::open(&path)?), switch.clone());
//! let store = FileStore::with_backend(Box::new(backend), FileStoreOptions::default())?;
//!
//! switch.crash_after(10);    // the next commit tears after 10 bytes
//! assert!(redo.commit().is_err());
//!
//! let reopened = FileStore::open(&path, FileStoreOptions::default())?;
//! ```

use ledgerdb_storage::{StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct SwitchState {
    bytes_written: AtomicU64,
    crash_at: AtomicU64,
    fail_on_sync: AtomicBool,
    crashed: AtomicBool,
}

/// Shared trigger for a [`CrashableBackend`].
///
/// The backend usually disappears into a store, so tests keep a clone of
/// the switch to arm it and inspect it.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashSwitch {
    /// Creates a disarmed switch.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SwitchState {
                bytes_written: AtomicU64::new(0),
                crash_at: AtomicU64::new(u64::MAX),
                fail_on_sync: AtomicBool::new(false),
                crashed: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been appended. Zero crashes on
    /// the next append before anything is written.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_at
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Crashes on the next sync, after the data was appended but before it
    /// is acknowledged as durable.
    pub fn crash_on_sync(&self) {
        self.state.fail_on_sync.store(true, Ordering::SeqCst);
    }

    /// Disarms the switch and revives the backend.
    pub fn reset(&self) {
        self.state.crash_at.store(u64::MAX, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Total bytes the backend has accepted.
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    fn trip(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn dead(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "backend crashed",
            )));
        }
        Ok(())
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps `inner`, tripping when `switch` says so.
    pub fn new(inner: Box<dyn StorageBackend>, switch: CrashSwitch) -> Self {
        Self { inner, switch }
    }

    /// The switch controlling this backend.
    pub fn switch(&self) -> &CrashSwitch {
        &self.switch
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.switch.dead()?;

        let state = &self.switch.state;
        let current = state.bytes_written.load(Ordering::SeqCst);
        let crash_at = state.crash_at.load(Ordering::SeqCst);

        if current >= crash_at {
            return Err(self.switch.trip("append"));
        }

        let len = data.len() as u64;
        if current + len > crash_at {
            // Write partial data up to crash point
            let partial = (crash_at - current) as usize;
            let _ = self.inner.append(&data[..partial]);
            state.bytes_written.fetch_add(partial as u64, Ordering::SeqCst);
            return Err(self.switch.trip("partial append"));
        }

        let offset = self.inner.append(data)?;
        state.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.switch.dead()?;
        if self.switch.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.switch.trip("sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.switch.dead()?;
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::AccountChange;
    use ledgerdb_core::{CoreError, RedoLog};
    use ledgerdb_storage::{FileBackend, FileStore, FileStoreOptions, InMemoryBackend, KvStore};
    use tempfile::tempdir;

    #[test]
    fn partial_append_then_dead() {
        let switch = CrashSwitch::new();
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), switch.clone());

        backend.append(b"abcd").unwrap();
        switch.crash_after(2);
        assert!(backend.append(b"efgh").is_err());
        assert!(switch.has_crashed());
        assert_eq!(backend.size().unwrap(), 6);

        assert!(backend.append(b"x").is_err());
        assert!(backend.truncate(4).is_err());
        assert!(backend.sync().is_err());

        switch.reset();
        backend.truncate(4).unwrap();
        assert_eq!(backend.read_at(0, 4).unwrap(), b"abcd");
    }

    #[test]
    fn crash_on_sync_keeps_appended_bytes() {
        let switch = CrashSwitch::new();
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()), switch.clone());

        switch.crash_on_sync();
        backend.append(b"data").unwrap();
        assert!(backend.sync().is_err());
        assert_eq!(switch.bytes_written(), 4);
    }

    fn open_crashable(path: &std::path::Path, switch: &CrashSwitch) -> FileStore {
        let backend = CrashableBackend::new(
            Box::new(FileBackend::open_with_create_dirs(path).unwrap()),
            switch.clone(),
        );
        FileStore::with_backend(Box::new(backend), FileStoreOptions::default()).unwrap()
    }

    fn flush_height(redo: &mut RedoLog<AccountChange, FileStore>, delta: i64) -> Result<(), CoreError> {
        let next = redo.current_height() + 1;
        redo.add_log(b"alice", AccountChange::balance("VITE", delta));
        redo.set_current_height(next);
        redo.prepare()?;
        redo.commit()
    }

    #[test]
    fn torn_commit_leaves_store_as_before() {
        crate::init_test_tracing();
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");
        let switch = CrashSwitch::new();

        {
            let store = std::sync::Arc::new(open_crashable(&path, &switch));
            let mut redo = RedoLog::new(store, 2, 1);
            flush_height(&mut redo, 10).unwrap();
            flush_height(&mut redo, 20).unwrap();

            switch.crash_after(7);
            assert!(flush_height(&mut redo, 30).is_err());
            assert!(switch.has_crashed());
            assert_eq!(redo.last_flushed_height(), 2);
        }

        let reopened = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        assert_eq!(reopened.buckets().unwrap(), vec![1, 2]);
    }

    #[test]
    fn crash_at_every_byte_is_atomic() {
        let dir = tempdir().unwrap();

        // Size of the journal record the third flush appends.
        let record_len = {
            let path = dir.path().join("probe.journal");
            let switch = CrashSwitch::new();
            let store = std::sync::Arc::new(open_crashable(&path, &switch));
            let mut redo = RedoLog::new(store, 2, 1);
            flush_height(&mut redo, 10).unwrap();
            flush_height(&mut redo, 20).unwrap();
            let before = switch.bytes_written();
            flush_height(&mut redo, 30).unwrap();
            switch.bytes_written() - before
        };

        for cut in 0..record_len {
            let path = dir.path().join(format!("cut{cut}.journal"));
            let switch = CrashSwitch::new();
            {
                let store = std::sync::Arc::new(open_crashable(&path, &switch));
                let mut redo = RedoLog::new(store, 2, 1);
                flush_height(&mut redo, 10).unwrap();
                flush_height(&mut redo, 20).unwrap();
                switch.crash_after(cut);
                assert!(flush_height(&mut redo, 30).is_err(), "cut {cut}");
            }

            let reopened = FileStore::open(&path, FileStoreOptions::default()).unwrap();
            assert_eq!(reopened.buckets().unwrap(), vec![1, 2], "cut {cut}");
        }
    }

    #[test]
    fn crash_on_sync_is_not_acknowledged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.journal");
        let switch = CrashSwitch::new();

        let store = std::sync::Arc::new(open_crashable(&path, &switch));
        let mut redo = RedoLog::new(std::sync::Arc::clone(&store), 100, 1);
        switch.crash_on_sync();
        assert!(flush_height(&mut redo, 1).is_err());
        assert_eq!(redo.last_flushed_height(), 0);
        assert!(store.buckets().unwrap().is_empty());
        assert!(redo.snapshot_log(1).is_some());
    }
}
