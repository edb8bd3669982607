//! End-to-end helpers tying the segment store and the redo log together
//! the way a chain layer drives them.

use crate::generators::AccountChange;
use ledgerdb_core::{CoreResult, Location, RecordParser, RedoLog, SegmentStore};
use ledgerdb_storage::{KvStore, StorageResult};
use std::collections::BTreeMap;

/// Every bucket of a store with its entries, for whole-store comparisons.
pub type BucketDump = BTreeMap<u64, Vec<(Vec<u8>, Vec<u8>)>>;

/// Reads every bucket of `store`.
pub fn dump_buckets<S: KvStore + ?Sized>(store: &S) -> StorageResult<BucketDump> {
    let mut dump = BTreeMap::new();
    for bucket in store.buckets()? {
        dump.insert(bucket, store.bucket_entries(bucket)?);
    }
    Ok(dump)
}

/// Records `activity[i]` at height `first_height + i`, advancing the current
/// height past the last one.
pub fn record_activity<S: KvStore>(
    redo: &mut RedoLog<AccountChange, S>,
    first_height: u64,
    activity: &[Vec<(Vec<u8>, AccountChange)>],
) {
    for (offset, changes) in activity.iter().enumerate() {
        redo.set_current_height(first_height + offset as u64);
        for (address, change) in changes {
            redo.add_log(address, change.clone());
        }
    }
    redo.set_current_height(first_height + activity.len() as u64);
}

/// Runs one flush cycle, persisting the redo record to `segments` before
/// committing. Returns where the record was stored.
///
/// # Errors
///
/// Returns the first error of the cycle. A prepare that fails to persist is
/// cancelled.
pub fn flush_with_record<S: KvStore>(
    redo: &mut RedoLog<AccountChange, S>,
    segments: &SegmentStore,
) -> CoreResult<Location> {
    redo.prepare()?;
    let persisted = redo
        .redo_log()
        .and_then(|record| segments.write(&record))
        .and_then(|location| segments.sync().map(|()| location));
    let location = match persisted {
        Ok(location) => location,
        Err(err) => {
            redo.cancel_prepare();
            return Err(err);
        }
    };
    redo.commit()?;
    Ok(location)
}

/// Re-applies every redo record stored from `start` to the end of the
/// segment store.
///
/// # Errors
///
/// Returns the first read, parse or patch error.
pub fn replay_records<S: KvStore>(
    redo: &mut RedoLog<AccountChange, S>,
    segments: &SegmentStore,
    start: Location,
) -> CoreResult<usize> {
    let mut parser = RecordParser::new();
    segments.read_range(start, Location::new(segments.latest_file_id(), 0), &mut parser)?;

    let records = parser.finish()?;
    for (_, record) in &records {
        redo.patch_redo_log(record)?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{memory_redo, small_segment_config, TestNode, TestSegments};
    use crate::generators::{
        block_payloads_strategy, flushing_set_strategy, height_activity_strategy,
    };
    use ledgerdb_codec::Batch;
    use ledgerdb_core::{redo::decode_redo_record, FlushingBatch};
    use proptest::prelude::*;

    #[test]
    fn rollback_scenario() {
        let (store, mut redo) = memory_redo(100, 1_000);

        let mut batch = Batch::new();
        batch.put(b"addr1", b"v1");
        redo.prepare_batches(BTreeMap::from([(100, FlushingBatch::write(batch))]))
            .unwrap();
        redo.commit().unwrap();
        assert_eq!(store.get(100, b"addr1").unwrap(), Some(b"v1".to_vec()));

        redo.prepare_batches(BTreeMap::from([(100, FlushingBatch::rollback())]))
            .unwrap();
        redo.commit().unwrap();
        assert!(!store.has_bucket(100).unwrap());
    }

    #[test]
    fn retention_scenario() {
        let (store, mut redo) = memory_redo(2, 1);
        for height in 1..=3u64 {
            redo.add_log(b"addr1", AccountChange::balance("VITE", height as i64));
            redo.set_current_height(height + 1);
            redo.prepare().unwrap();
            redo.commit().unwrap();
        }

        assert_eq!(store.buckets().unwrap(), vec![2, 3]);
    }

    #[test]
    fn records_in_segments_rebuild_store_after_restart() {
        crate::init_test_tracing();
        let node = TestNode::new(small_segment_config(256));
        let start = node.segments.latest_location();

        let expected = {
            let mut redo = node.redo(1);
            for height in 1..=6u64 {
                redo.add_log(b"alice", AccountChange::balance("VITE", height as i64));
                redo.add_log(b"bob", AccountChange::balance("VX", -(height as i64)));
                redo.set_current_height(height + 1);
                flush_with_record(&mut redo, &node.segments).unwrap();
            }
            dump_buckets(node.store.as_ref()).unwrap()
        };

        let node = node.restart();
        // Throw the durable store away and rebuild it from the records.
        let (fresh_store, mut fresh_redo) = memory_redo(100, 7);
        let replayed = replay_records(&mut fresh_redo, &node.segments, start).unwrap();

        assert_eq!(replayed, 6);
        assert_eq!(dump_buckets(fresh_store.as_ref()).unwrap(), expected);
        assert_eq!(fresh_redo.last_flushed_height(), 6);
    }

    #[test]
    fn crash_between_record_and_commit_is_recovered() {
        let node = TestNode::new(small_segment_config(1024));
        let start = node.segments.latest_location();

        {
            let mut redo = node.redo(1);
            redo.add_log(b"alice", AccountChange::balance("VITE", 1));
            redo.set_current_height(2);
            redo.prepare().unwrap();
            node.segments.write(&redo.redo_log().unwrap()).unwrap();
            // Process dies before commit.
        }
        assert!(!node.store.has_bucket(1).unwrap());

        let node = node.restart();
        let mut redo = node.redo(2);
        replay_records(&mut redo, &node.segments, start).unwrap();

        let logs = redo.query_log(1).unwrap().unwrap();
        assert_eq!(
            logs[b"alice".as_slice()],
            vec![AccountChange::balance("VITE", 1)]
        );
    }

    #[test]
    fn chain_rollback_truncates_blocks_and_redo() {
        let node = TestNode::new(small_segment_config(64));
        let mut redo = node.redo(1);

        let mut block_locations = Vec::new();
        for height in 1..=5u64 {
            let block = format!("block {height}");
            block_locations.push(node.segments.write(block.as_bytes()).unwrap());
            redo.add_log(b"miner", AccountChange::balance("VITE", 10));
            redo.set_current_height(height + 1);
        }
        redo.prepare().unwrap();
        redo.commit().unwrap();

        // Roll the chain back to height 3.
        let mut removed = RecordParser::new();
        node.segments.delete_to(block_locations[3], &mut removed).unwrap();
        let removed = removed.finish().unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].1, b"block 4");

        for height in 4..=5 {
            redo.rollback(height);
        }
        redo.prepare().unwrap();
        redo.commit().unwrap();

        assert_eq!(node.store.buckets().unwrap(), vec![1, 2, 3]);
        assert_eq!(node.segments.latest_location(), block_locations[3]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn patch_matches_commit_for_staged_sets(
            retain in 1u64..5,
            sets in prop::collection::vec(flushing_set_strategy(12), 1..4),
        ) {
            let (committed, mut producer) = memory_redo(retain, 10_000);
            let (patched, mut follower) = memory_redo(retain, 10_000);

            for set in sets {
                producer.prepare_batches(set).unwrap();
                let record = producer.redo_log().unwrap();
                producer.commit().unwrap();
                follower.patch_redo_log(&record).unwrap();
            }

            prop_assert_eq!(
                dump_buckets(committed.as_ref()).unwrap(),
                dump_buckets(patched.as_ref()).unwrap()
            );
        }

        #[test]
        fn blocks_scan_back_and_roll_back_in_order(
            blocks in block_payloads_strategy(24),
            cut in any::<prop::sample::Index>(),
        ) {
            let segments = TestSegments::with_config(small_segment_config(1024));
            let locations: Vec<Location> = blocks
                .iter()
                .map(|block| segments.write(block).unwrap())
                .collect();

            let mut scan = RecordParser::new();
            segments
                .read_range(
                    locations[0],
                    Location::new(segments.latest_file_id(), 0),
                    &mut scan,
                )
                .unwrap();
            let scanned = scan.finish().unwrap();
            prop_assert_eq!(scanned.len(), blocks.len());
            for ((location, payload), (expected_location, block)) in
                scanned.iter().zip(locations.iter().zip(&blocks))
            {
                prop_assert_eq!(location, expected_location);
                prop_assert_eq!(payload, block);
            }

            let cut = cut.index(blocks.len());
            let mut removed = RecordParser::new();
            segments.delete_to(locations[cut], &mut removed).unwrap();
            let removed: Vec<Vec<u8>> = removed
                .finish()
                .unwrap()
                .into_iter()
                .map(|(_, payload)| payload)
                .collect();
            prop_assert_eq!(&removed[..], &blocks[cut..]);
            prop_assert_eq!(segments.latest_location(), locations[cut]);
        }

        #[test]
        fn producer_records_round_trip(activity in height_activity_strategy(8)) {
            let (committed, mut producer) = memory_redo(3, 1);
            record_activity(&mut producer, 1, &activity);

            producer.prepare().unwrap();
            let record = producer.redo_log().unwrap();
            let staged: Vec<(u64, FlushingBatch)> = producer
                .flushing_batches()
                .unwrap()
                .iter()
                .map(|(h, b)| (*h, b.clone()))
                .collect();
            prop_assert_eq!(decode_redo_record(&record).unwrap(), staged);
            producer.commit().unwrap();

            let (patched, mut follower) = memory_redo(3, 1_000);
            follower.patch_redo_log(&record).unwrap();
            prop_assert_eq!(
                dump_buckets(committed.as_ref()).unwrap(),
                dump_buckets(patched.as_ref()).unwrap()
            );
            prop_assert!(committed.buckets().unwrap().len() <= 3);
        }
    }
}
