//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ledgerdb_core::RedoLog;
use ledgerdb_storage::KvStore;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Redo entry used across the benchmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchChange {
    /// Storage slot touched.
    pub slot: Vec<u8>,
    /// New slot value.
    pub value: Vec<u8>,
}

/// Generate random block data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` random 20-byte addresses.
pub fn generate_addresses(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| random_data(20)).collect()
}

/// Records `per_height` changes for each of `heights` heights starting at
/// the redo log's current height, leaving the next height current.
pub fn fill_heights<S: KvStore>(
    redo: &mut RedoLog<BenchChange, S>,
    addresses: &[Vec<u8>],
    heights: u64,
    per_height: usize,
) {
    let mut rng = rand::thread_rng();
    let first = redo.current_height();
    for height in first..first + heights {
        redo.set_current_height(height);
        for _ in 0..per_height {
            let address = &addresses[rng.gen_range(0..addresses.len())];
            redo.add_log(
                address,
                BenchChange {
                    slot: random_data(32),
                    value: random_data(32),
                },
            );
        }
    }
    redo.set_current_height(first + heights);
}
