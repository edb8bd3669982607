//! # LedgerDB Testkit
//!
//! Test utilities for LedgerDB.
//!
//! This crate provides:
//! - Fixtures for temporary segment stores and redo logs
//! - Property-based test generators using proptest
//! - A crash-injecting storage backend for atomicity tests
//! - End-to-end flush and recovery scenarios across both subsystems
//!
//! ## Usage
//!
//! ```rust
//! use ledgerdb_testkit::prelude::*;
//!
//! with_temp_segments(|segments| {
//!     let loc = segments.write(b"block").unwrap();
//!     assert_eq!(segments.read(loc).unwrap(), b"block");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::init_test_tracing;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// Filtering follows `RUST_LOG`, defaulting to `warn`. Output goes through
/// the test harness capture, so it only shows for failing tests.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second call finds the global subscriber already set; that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
