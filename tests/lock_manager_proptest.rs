//! Property tests for the two invariants that are awkward to pin down with
//! a handful of concrete examples: that wait-die can never produce a wait
//! cycle (P4), and that strict two-phase locking is actually strict (P5).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use rusty_db_lock_manager::common::Rid;
use rusty_db_lock_manager::transaction::{LockDataId, LockManagement, LockManager, Transaction, TransactionError};

fn record(slot: i32) -> LockDataId {
    LockDataId::record(1, Rid::new(0, slot))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// P4: wait-die only ever produces an edge from a lower id (waiter) to
    /// a higher id (holder) — never the reverse, which is exactly what
    /// rules out a cycle in the waits-for relation. Exercised both
    /// directions: a younger requester dies immediately; an older one
    /// waits and is eventually granted once the holder releases.
    #[test]
    fn wait_die_edges_always_point_from_lower_to_higher_id(
        holder_id in 1u64..1000,
        requester_id in 1u64..1000,
    ) {
        prop_assume!(holder_id != requester_id);

        let lm = Arc::new(LockManager::new());
        let holder = Arc::new(Transaction::new(holder_id));
        let rid = record(0);
        lm.lock_exclusive_record(&holder, rid).unwrap();

        if requester_id > holder_id {
            // Younger: must die immediately, never block.
            let requester = Transaction::new(requester_id);
            let err = lm.lock_shared_record(&requester, rid).unwrap_err();
            prop_assert!(matches!(
                err,
                TransactionError::DeadlockPrevention { txn_id, held_by, .. }
                    if txn_id == requester_id && held_by == holder_id
            ));
        } else {
            // Older: must wait and eventually succeed once the holder releases.
            let requester = Arc::new(Transaction::new(requester_id));
            let lm2 = Arc::clone(&lm);
            let requester2 = Arc::clone(&requester);
            let handle = thread::spawn(move || lm2.lock_shared_record(&requester2, rid));

            thread::sleep(Duration::from_millis(30));
            lm.unlock(&holder, rid).unwrap();

            prop_assert!(handle.join().unwrap().unwrap());
        }
    }

    /// P5: once a transaction has unlocked anything, every subsequent lock
    /// request it makes is rejected with `LockOnShrinking`, regardless of
    /// which resource or mode it asks for next.
    #[test]
    fn no_lock_request_succeeds_after_the_first_unlock(
        first_slot in 0i32..8,
        second_slot in 0i32..8,
        request_exclusive in any::<bool>(),
    ) {
        let lm = LockManager::new();
        let txn = Transaction::new(1);
        let first = record(first_slot);
        let second = record(second_slot);

        lm.lock_shared_record(&txn, first).unwrap();
        lm.unlock(&txn, first).unwrap();

        let result = if request_exclusive {
            lm.lock_exclusive_record(&txn, second)
        } else {
            lm.lock_shared_record(&txn, second)
        };

        prop_assert!(matches!(result, Err(TransactionError::LockOnShrinking { txn_id: 1, .. })));
    }
}
