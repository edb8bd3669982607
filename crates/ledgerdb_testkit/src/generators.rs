//! Property-based test generators using proptest.
//!
//! Provides strategies for segment records, mutation batches, staged flush
//! sets and the redo entries producers record.

use ledgerdb_codec::Batch;
use ledgerdb_core::FlushingBatch;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A redo entry shaped like an account-state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountChange {
    /// Token the balance change applies to.
    pub token: String,
    /// Signed balance delta.
    pub delta: i64,
    /// Optional storage slot written by a contract call.
    pub storage: Option<(Vec<u8>, Vec<u8>)>,
}

impl AccountChange {
    /// A plain balance change.
    pub fn balance(token: &str, delta: i64) -> Self {
        Self {
            token: token.to_string(),
            delta,
            storage: None,
        }
    }
}

/// Strategy for 20-byte account addresses.
pub fn address_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 20)
}

/// Strategy for account changes.
pub fn account_change_strategy() -> impl Strategy<Value = AccountChange> {
    (
        prop::string::string_regex("[A-Z]{2,6}").expect("Invalid regex"),
        any::<i64>(),
        prop::option::of((
            prop::collection::vec(any::<u8>(), 1..32),
            prop::collection::vec(any::<u8>(), 0..64),
        )),
    )
        .prop_map(|(token, delta, storage)| AccountChange {
            token,
            delta,
            storage,
        })
}

/// Strategy for raw block payloads, including empty ones.
pub fn block_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for a sequence of block payloads.
pub fn block_payloads_strategy(max_blocks: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(block_payload_strategy(), 1..=max_blocks.max(1))
}

/// Strategy for mutation batches mixing puts and deletes.
pub fn batch_strategy() -> impl Strategy<Value = Batch> {
    prop::collection::vec(
        (
            any::<bool>(),
            prop::collection::vec(any::<u8>(), 0..24),
            prop::collection::vec(any::<u8>(), 0..64),
        ),
        0..16,
    )
    .prop_map(|ops| {
        let mut batch = Batch::new();
        for (is_put, key, value) in ops {
            if is_put {
                batch.put(&key, &value);
            } else {
                batch.delete(&key);
            }
        }
        batch
    })
}

/// Strategy for one staged height.
pub fn flushing_batch_strategy() -> impl Strategy<Value = FlushingBatch> {
    prop_oneof![
        4 => batch_strategy().prop_map(FlushingBatch::write),
        1 => Just(FlushingBatch::rollback()),
        1 => Just(FlushingBatch::cover()),
    ]
}

/// Strategy for a staged flush set over heights in `1..=max_height`.
pub fn flushing_set_strategy(max_height: u64) -> impl Strategy<Value = BTreeMap<u64, FlushingBatch>> {
    prop::collection::btree_map(1..=max_height.max(1), flushing_batch_strategy(), 0..12)
}

/// Strategy for per-height producer activity: for each height, the
/// `(address, change)` pairs recorded while it was current.
pub fn height_activity_strategy(
    heights: usize,
) -> impl Strategy<Value = Vec<Vec<(Vec<u8>, AccountChange)>>> {
    prop::collection::vec(
        prop::collection::vec((address_strategy(), account_change_strategy()), 0..6),
        1..=heights.max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerdb_core::FlushOpt;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn addresses_are_twenty_bytes() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let address = address_strategy().new_tree(&mut runner).unwrap().current();
            assert_eq!(address.len(), 20);
        }
    }

    #[test]
    fn flushing_sets_respect_height_bound() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let set = flushing_set_strategy(8).new_tree(&mut runner).unwrap().current();
            assert!(set.keys().all(|h| (1..=8).contains(h)));
            for staged in set.values() {
                assert_eq!(
                    staged.batch().is_some(),
                    staged.operation() == FlushOpt::Write
                );
            }
        }
    }
}
