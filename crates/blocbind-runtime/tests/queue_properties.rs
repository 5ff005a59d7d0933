//! Property tests for update queue coalescing and ordering.

use blocbind_runtime::dispatch::ChannelDispatcher;
use blocbind_runtime::queue::{OpKey, UpdateQueue};

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

proptest! {
    /// Every distinct key is applied exactly once per flush, with the most
    /// recently scheduled body, in reverse order of first submission.
    #[test]
    fn coalescing_applies_each_key_once_in_lifo_order(
        ops in proptest::collection::vec((0usize..8, 0u32..1000), 1..64),
    ) {
        let dispatcher = Arc::new(ChannelDispatcher::new());
        let queue = UpdateQueue::new(dispatcher.clone());
        let keys: Vec<OpKey> = (0..8).map(|_| OpKey::next()).collect();

        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut last_value: HashMap<usize, u32> = HashMap::new();
        let mut first_submission: Vec<usize> = Vec::new();

        for &(slot, value) in &ops {
            if !last_value.contains_key(&slot) {
                first_submission.push(slot);
            }
            last_value.insert(slot, value);

            let log = applied.clone();
            queue.schedule(keys[slot], move || log.lock().unwrap().push((slot, value)));
        }
        dispatcher.run_pending();

        let expected: Vec<(usize, u32)> = first_submission
            .iter()
            .rev()
            .map(|slot| (*slot, last_value[slot]))
            .collect();
        prop_assert_eq!(applied.lock().unwrap().clone(), expected);
        prop_assert_eq!(queue.pending_len(), 0);
    }

    /// Scheduling in several batches with a flush between each applies
    /// every batch independently; coalescing never leaks across flushes.
    #[test]
    fn coalescing_window_resets_per_flush(
        batches in proptest::collection::vec(
            proptest::collection::vec(0usize..4, 1..8),
            1..6,
        ),
    ) {
        let dispatcher = Arc::new(ChannelDispatcher::new());
        let queue = UpdateQueue::new(dispatcher.clone());
        let keys: Vec<OpKey> = (0..4).map(|_| OpKey::next()).collect();
        let applied = Arc::new(Mutex::new(Vec::new()));

        let mut expected_total = 0usize;
        for batch in &batches {
            let mut distinct: Vec<usize> = Vec::new();
            for &slot in batch {
                if !distinct.contains(&slot) {
                    distinct.push(slot);
                }
                let log = applied.clone();
                queue.schedule(keys[slot], move || log.lock().unwrap().push(slot));
            }
            expected_total += distinct.len();
            dispatcher.run_pending();
            prop_assert_eq!(queue.pending_len(), 0);
        }
        prop_assert_eq!(applied.lock().unwrap().len(), expected_total);
    }
}
