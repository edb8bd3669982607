//! Snapshot-indexed redo log.
//!
//! Producers record per-address redo entries against a snapshot height.
//! A flush cycle turns the tracked heights into [`FlushingBatch`]es,
//! optionally serializes them into a redo record for crash recovery or
//! replication, and then commits them to a [`ledgerdb_storage::KvStore`]
//! in a single transaction.
//!
//! ## Flush Cycle
//!
//! ```text
//! Idle --prepare--> Prepared --commit--> Idle
//!                      |
//!                      +--cancel_prepare--> Idle
//! ```
//!
//! ## Redo Record Format
//!
//! ```text
//! | height (8, BE) | op (1) | [ batch len (4, BE) | batch (len) ] | ...
//! ```
//!
//! The bracketed part is present only for [`FlushOpt::Write`]. There is no
//! terminator; the record ends where its enclosing buffer ends.

mod flush;
mod log;
mod replay;
mod snapshot;
mod wire;

pub use flush::{FlushOpt, FlushingBatch};
pub use log::{FlushState, RedoLog};
pub use snapshot::SnapshotLog;
pub use wire::{decode_redo_record, encode_redo_record};
