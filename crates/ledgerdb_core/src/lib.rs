//! # LedgerDB Core
//!
//! Persistence core of a blockchain full node.
//!
//! This crate provides:
//! - [`Location`]: compact `(file id, offset)` handles addressing stored bytes
//! - [`SegmentStore`]: append-only block files with rotation, point reads,
//!   range scans and rollback truncation
//! - [`RedoLog`]: per-snapshot-height redo buffering with prepare / commit /
//!   cancel, a byte-exact redo record for crash recovery, and a rolling
//!   retention window over the durable store
//!
//! ## Flush Cycle
//!
//! ```ignore
//! redo.prepare()?;
//! let record = redo.redo_log()?;   // persist or ship before committing
//! segment_store.write(&record)?;
//! redo.commit()?;
//!
//! // after a crash, with the persisted record:
//! redo.patch_redo_log(&record)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod location;
pub mod redo;
pub mod segment;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use location::{Location, LOCATION_SIZE};
pub use redo::{FlushOpt, FlushState, FlushingBatch, RedoLog, SnapshotLog};
pub use segment::{RecordParser, SegmentSink, SegmentStore};
