//! # LedgerDB Codec
//!
//! Byte formats that travel inside LedgerDB's redo records.
//!
//! - [`Batch`]: an ordered set of put/delete mutations that can be dumped to
//!   bytes, loaded back and replayed against any [`BatchReplay`] sink.
//! - [`encode_entries`] / [`decode_entries`]: the length-delimited encoding
//!   of an address's redo entries, one CBOR item per entry.
//!
//! ## Usage
//!
//! ```
//! use ledgerdb_codec::{Batch, BatchReplay};
//!
//! let mut batch = Batch::new();
//! batch.put(b"addr1", b"v1");
//! batch.delete(b"addr2");
//!
//! let loaded = Batch::load(&batch.dump().unwrap()).unwrap();
//! assert_eq!(loaded, batch);
//!
//! struct Count(usize);
//! impl BatchReplay for Count {
//!     type Error = std::convert::Infallible;
//!     fn put(&mut self, _: &[u8], _: &[u8]) -> Result<(), Self::Error> { self.0 += 1; Ok(()) }
//!     fn delete(&mut self, _: &[u8]) -> Result<(), Self::Error> { self.0 += 1; Ok(()) }
//! }
//!
//! let mut count = Count(0);
//! loaded.replay(&mut count).unwrap();
//! assert_eq!(count.0, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod entry;
mod error;

pub use batch::{Batch, BatchOp, BatchReplay};
pub use entry::{decode_entries, encode_entries};
pub use error::{CodecError, CodecResult};
