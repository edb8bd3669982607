//! # LedgerDB Storage
//!
//! Durable storage primitives for LedgerDB.
//!
//! This crate provides two layers:
//!
//! - **Append-only backends** ([`StorageBackend`]): opaque byte stores with
//!   read, append, sync and truncate. They know nothing about the records
//!   written through them.
//! - **Bucketed key/value stores** ([`KvStore`]): buckets keyed by snapshot
//!   height, each holding ordered key/value entries, mutated only through a
//!   single-writer [`WriteTxn`] that commits atomically or not at all.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests and ephemeral nodes
//! - [`FileStore`] - Committed transactions journaled through a backend and
//!   replayed on open
//!
//! ## Example
//!
//! ```rust
//! use ledgerdb_storage::{InMemoryStore, KvStore};
//!
//! let store = InMemoryStore::new();
//! let mut txn = store.begin_write().unwrap();
//! txn.create_bucket_if_not_exists(100).unwrap();
//! txn.put(100, b"addr1", b"v1").unwrap();
//! txn.commit().unwrap();
//!
//! assert_eq!(store.get(100, b"addr1").unwrap(), Some(b"v1".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod file_store;
mod journal;
mod mem_store;
mod memory;
mod store;
mod table;
mod txn;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use file_store::{FileStore, FileStoreOptions};
pub use mem_store::InMemoryStore;
pub use memory::InMemoryBackend;
pub use store::{bucket_key, KvStore};
pub use txn::WriteTxn;
