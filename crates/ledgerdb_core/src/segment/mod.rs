//! Segmented block storage.
//!
//! Raw serialized blocks are appended to a directory of size-capped files
//! named `data1`, `data2`, ... Each write returns a [`crate::Location`] that
//! addresses the record for later point reads, range scans and rollback.
//!
//! ## Segment Record Format
//!
//! ```text
//! | length (4, BE) | payload (length) |
//! ```
//!
//! A record never straddles two files. When appending a record would push
//! the active file past `max_segment_size`, the store rotates to the next id
//! first, so only a single record larger than the cap can ever exceed it.
//!
//! ## Invariants
//!
//! - Exactly one file, the highest-numbered, receives appends
//! - Files are only ever appended to, truncated by `delete_to`, or removed
//!   whole by `delete_to`
//! - Range scans and rollbacks push bytes to a [`SegmentSink`] in ascending
//!   `(file id, offset)` order

mod pool;
mod sink;
mod store;

pub use sink::{RecordParser, SegmentSink};
pub use store::SegmentStore;
