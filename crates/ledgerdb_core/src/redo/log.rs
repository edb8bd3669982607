//! The redo log and its flush cycle.

use super::flush::{FlushOpt, FlushingBatch};
use super::replay::apply_flushing_batch;
use super::snapshot::SnapshotLog;
use super::wire::{encode_redo_record, RedoRecordReader};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use ledgerdb_codec::decode_entries;
use ledgerdb_storage::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where the redo log is in its flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No batches are staged.
    Idle,
    /// `prepare` has staged batches awaiting `commit` or `cancel_prepare`.
    Prepared,
}

/// Buffers redo entries per snapshot height and flushes them into a
/// bucketed key/value store.
///
/// Each flushed height becomes one bucket, keyed by the height, holding one
/// entry per address. Only the most recent `retain_height` heights are kept.
///
/// The redo log is single-writer: every mutating call takes `&mut self`.
/// Readers that only need committed heights can go to the store directly.
///
/// # Example
///
/// ```
/// use ledgerdb_core::RedoLog;
/// use ledgerdb_storage::{InMemoryStore, KvStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryStore::new());
/// let mut redo: RedoLog<String, _> = RedoLog::new(Arc::clone(&store), 100, 1);
///
/// redo.add_log(b"addr1", "transfer".to_string());
/// redo.set_current_height(2);
///
/// redo.prepare().unwrap();
/// let record = redo.redo_log().unwrap();
/// redo.commit().unwrap();
///
/// assert!(store.has_bucket(1).unwrap());
/// assert!(!record.is_empty());
/// ```
pub struct RedoLog<E, S: KvStore> {
    store: Arc<S>,
    retain_height: u64,
    current_height: u64,
    snapshot_logs: BTreeMap<u64, SnapshotLog<E>>,
    flushing: Option<BTreeMap<u64, FlushingBatch>>,
    last_flushed_height: u64,
}

impl<E, S> RedoLog<E, S>
where
    E: Serialize + DeserializeOwned + Clone,
    S: KvStore,
{
    /// Creates a redo log tracking `current_height`.
    #[must_use]
    pub fn new(store: Arc<S>, retain_height: u64, current_height: u64) -> Self {
        let mut snapshot_logs = BTreeMap::new();
        snapshot_logs.insert(current_height, SnapshotLog::new());
        Self {
            store,
            retain_height,
            current_height,
            snapshot_logs,
            flushing: None,
            last_flushed_height: 0,
        }
    }

    /// Creates a redo log using the retention window from `config`.
    #[must_use]
    pub fn with_config(store: Arc<S>, config: &Config, current_height: u64) -> Self {
        Self::new(store, config.retain_height, current_height)
    }

    /// The durable store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of most recent heights kept in the store.
    #[must_use]
    pub fn retain_height(&self) -> u64 {
        self.retain_height
    }

    /// The height currently accumulating entries.
    #[must_use]
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Highest height whose `Write` has been committed, or 0.
    #[must_use]
    pub fn last_flushed_height(&self) -> u64 {
        self.last_flushed_height
    }

    /// Current flush cycle state.
    #[must_use]
    pub fn state(&self) -> FlushState {
        if self.flushing.is_some() {
            FlushState::Prepared
        } else {
            FlushState::Idle
        }
    }

    /// The in-memory log for `height`, if tracked.
    #[must_use]
    pub fn snapshot_log(&self, height: u64) -> Option<&SnapshotLog<E>> {
        self.snapshot_logs.get(&height)
    }

    /// Batches staged by the last `prepare`.
    #[must_use]
    pub fn flushing_batches(&self) -> Option<&BTreeMap<u64, FlushingBatch>> {
        self.flushing.as_ref()
    }

    /// Moves accumulation to `height`, tracking it with a fresh `Write` log
    /// unless it is already tracked.
    pub fn set_current_height(&mut self, height: u64) {
        self.snapshot_logs.entry(height).or_default();
        self.current_height = height;
    }

    /// Records `entry` for `address` at the current height.
    pub fn add_log(&mut self, address: &[u8], entry: E) {
        self.snapshot_logs
            .entry(self.current_height)
            .or_default()
            .push(address, entry);
    }

    /// Marks `height` rolled back: its in-memory entries are dropped and
    /// the next flush removes its bucket.
    pub fn rollback(&mut self, height: u64) {
        self.snapshot_logs.entry(height).or_default().mark_rollback();
        tracing::debug!(height, "snapshot height rolled back");
    }

    /// Marks `height` covered: the next flush removes its bucket, while its
    /// in-memory entries are kept.
    pub fn cover(&mut self, height: u64) {
        self.snapshot_logs.entry(height).or_default().mark_cover();
        tracing::debug!(height, "snapshot height covered");
    }

    /// Stages every tracked height for commit.
    ///
    /// The current height is skipped while it is still a `Write`, since it
    /// is still accumulating entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a prepare is already
    /// outstanding, or a codec error if an entry cannot be serialized.
    pub fn prepare(&mut self) -> CoreResult<()> {
        self.ensure_idle()?;

        let mut flushing = BTreeMap::new();
        for (height, log) in &self.snapshot_logs {
            if *height == self.current_height && log.flush_opt() == FlushOpt::Write {
                continue;
            }
            flushing.insert(*height, log.to_flushing_batch()?);
        }

        tracing::debug!(
            heights = flushing.len(),
            current_height = self.current_height,
            "redo prepared"
        );
        self.flushing = Some(flushing);
        Ok(())
    }

    /// Stages externally built batches, such as ones decoded from a redo
    /// record shipped by another node.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a prepare is already
    /// outstanding.
    pub fn prepare_batches(&mut self, batches: BTreeMap<u64, FlushingBatch>) -> CoreResult<()> {
        self.ensure_idle()?;
        tracing::debug!(heights = batches.len(), "redo batches staged");
        self.flushing = Some(batches);
        Ok(())
    }

    /// Discards staged batches without touching the store.
    pub fn cancel_prepare(&mut self) {
        if let Some(flushing) = self.flushing.take() {
            tracing::debug!(heights = flushing.len(), "redo prepare cancelled");
        }
    }

    /// Serializes the staged batches into a redo record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if nothing is prepared.
    pub fn redo_log(&self) -> CoreResult<Vec<u8>> {
        let flushing = self
            .flushing
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("redo_log called before prepare"))?;
        encode_redo_record(flushing)
    }

    /// Applies the staged batches to the store in one transaction.
    ///
    /// The staged batches are consumed either way. On success the flushed
    /// heights leave memory, the current height stays tracked as a `Write`
    /// and the flushed watermark advances. On failure nothing becomes
    /// visible and the in-memory logs are untouched, so a fresh `prepare`
    /// retries the same data.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if nothing is prepared, or
    /// the storage error that aborted the transaction.
    pub fn commit(&mut self) -> CoreResult<()> {
        let flushing = self
            .flushing
            .take()
            .ok_or_else(|| CoreError::invalid_operation("commit called before prepare"))?;

        if let Err(err) = self.apply(flushing.iter().map(|(h, b)| Ok((*h, b)))) {
            tracing::warn!(error = %err, heights = flushing.len(), "redo commit failed");
            return Err(err);
        }

        for height in flushing.keys() {
            if *height != self.current_height {
                self.snapshot_logs.remove(height);
            }
        }
        self.snapshot_logs
            .entry(self.current_height)
            .or_default()
            .mark_write();
        self.advance_watermark(&flushing);

        tracing::info!(
            heights = flushing.len(),
            last_flushed_height = self.last_flushed_height,
            "redo committed"
        );
        Ok(())
    }

    /// Re-applies a redo record to the store in one transaction.
    ///
    /// Tuples apply in stream order with the same effects as `commit`. A
    /// malformed record aborts the whole transaction. In-memory logs are not
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] while a prepare is
    /// outstanding, a corruption or codec error for a malformed record, or
    /// the storage error that aborted the transaction.
    pub fn patch_redo_log(&mut self, record: &[u8]) -> CoreResult<()> {
        self.ensure_idle()?;
        if record.is_empty() {
            return Ok(());
        }

        let mut write_heights = Vec::new();
        let tuples = RedoRecordReader::new(record).inspect(|tuple| {
            if let Ok((height, flushing)) = tuple {
                if flushing.operation() == FlushOpt::Write {
                    write_heights.push(*height);
                }
            }
        });
        if let Err(err) = self.apply(tuples) {
            tracing::warn!(error = %err, bytes = record.len(), "redo patch failed");
            return Err(err);
        }

        if let Some(highest) = write_heights.into_iter().max() {
            self.last_flushed_height = self.last_flushed_height.max(highest);
        }
        tracing::info!(
            bytes = record.len(),
            last_flushed_height = self.last_flushed_height,
            "redo record patched"
        );
        Ok(())
    }

    /// Entries recorded for `height`, by address.
    ///
    /// Unflushed heights answer from memory; flushed ones are decoded from
    /// the height's bucket. Returns `None` for a rolled back or unknown
    /// height.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error if the bucket cannot be read.
    pub fn query_log(&self, height: u64) -> CoreResult<Option<BTreeMap<Vec<u8>, Vec<E>>>> {
        if let Some(log) = self.snapshot_logs.get(&height) {
            match log.flush_opt() {
                FlushOpt::Rollback => return Ok(None),
                FlushOpt::Cover => return Ok(Some(log.logs().clone())),
                // The current height may already have a bucket from before
                // it was re-tracked; memory wins only when it has entries.
                FlushOpt::Write if !log.is_empty() => return Ok(Some(log.logs().clone())),
                FlushOpt::Write => {}
            }
        }

        if !self.store.has_bucket(height)? {
            return Ok(None);
        }
        let mut logs = BTreeMap::new();
        for (address, value) in self.store.bucket_entries(height)? {
            logs.insert(address, decode_entries(&value)?);
        }
        Ok(Some(logs))
    }

    /// Returns true if entries exist for `height` in memory or in the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be queried.
    pub fn has_redo(&self, height: u64) -> CoreResult<bool> {
        if let Some(log) = self.snapshot_logs.get(&height) {
            match log.flush_opt() {
                FlushOpt::Rollback => return Ok(false),
                FlushOpt::Cover => return Ok(!log.is_empty()),
                FlushOpt::Write if !log.is_empty() => return Ok(true),
                FlushOpt::Write => {}
            }
        }
        Ok(self.store.has_bucket(height)?)
    }

    fn ensure_idle(&self) -> CoreResult<()> {
        if self.flushing.is_some() {
            return Err(CoreError::invalid_operation(
                "a prepared flush is outstanding; commit or cancel it first",
            ));
        }
        Ok(())
    }

    /// Applies tuples inside one write transaction, committing only if all
    /// of them applied.
    fn apply<I, B>(&self, tuples: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = CoreResult<(u64, B)>>,
        B: Borrow<FlushingBatch>,
    {
        let mut txn = self.store.begin_write()?;
        for tuple in tuples {
            let (height, flushing) = tuple?;
            apply_flushing_batch(&mut txn, self.retain_height, height, flushing.borrow())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn advance_watermark(&mut self, flushed: &BTreeMap<u64, FlushingBatch>) {
        let highest_write = flushed
            .iter()
            .filter(|(_, b)| b.operation() == FlushOpt::Write)
            .map(|(h, _)| *h)
            .max();
        if let Some(height) = highest_write {
            self.last_flushed_height = self.last_flushed_height.max(height);
        }
    }
}

impl<E, S: KvStore> std::fmt::Debug for RedoLog<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedoLog")
            .field("retain_height", &self.retain_height)
            .field("current_height", &self.current_height)
            .field("tracked_heights", &self.snapshot_logs.len())
            .field("prepared", &self.flushing.as_ref().map(BTreeMap::len))
            .field("last_flushed_height", &self.last_flushed_height)
            .finish()
    }
}
