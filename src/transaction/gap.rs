//! Insert-time coordination between gap locks and the index/record layer
//! this crate does not own.
//!
//! Inserting a row can create a phantom for a concurrent range scan holding
//! a gap lock over the position the new row lands on. The protocol below —
//! lock `IX` on the table, wait out any gap lock on each index's insertion
//! point, then insert the record and its index entries — is the same
//! ordering an executor's insert operator follows; it is kept here as a
//! coordinator over two small traits rather than inside an executor this
//! crate does not have, so storage/index code can plug in without this
//! crate depending on either.

use crate::common::Rid;
use crate::transaction::error::LockResult;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::traits::LockManagement;
use crate::transaction::types::{LockDataId, Transaction, WriteRecord};

/// Read-side of the table's indexes: how many there are, and where a fresh
/// row's key would land in each one.
pub trait IndexGapSource {
    /// Number of indexes defined on `table_fd`.
    fn index_count(&self, table_fd: i32) -> usize;

    /// The position (page, slot) the new row's key would be inserted at in
    /// index `index` — the same position a concurrent range scan's
    /// lower-bound lookup would land on, and therefore the gap this insert
    /// must wait out before proceeding.
    fn lower_bound(&self, table_fd: i32, index: usize) -> Rid;
}

/// Write-side of the record file and its indexes.
pub trait RecordInserter {
    /// Appends the new row to the table's record file, returning its rid.
    fn insert_record(&self, table_fd: i32) -> Rid;

    /// Inserts `rid` into index `index` on `table_fd`.
    fn insert_into_index(&self, table_fd: i32, index: usize, rid: Rid);
}

/// Drives one insert through the gap-lock protocol against a lock manager
/// and a storage/index backend implementing [`IndexGapSource`] +
/// [`RecordInserter`].
pub struct InsertGapCoordinator<'a, T> {
    lock_manager: &'a LockManager,
    backend: &'a T,
}

impl<'a, T> InsertGapCoordinator<'a, T>
where
    T: IndexGapSource + RecordInserter,
{
    pub fn new(lock_manager: &'a LockManager, backend: &'a T) -> Self {
        Self { lock_manager, backend }
    }

    /// Runs the five-step insert protocol and returns the new row's rid.
    ///
    /// `table_fd` addresses the table for locking and for the backend's own
    /// record/index operations; `table_name` is carried separately because
    /// the write set records the table by name, the identifier rollback
    /// replays against, not the lock manager's internal file descriptor.
    ///
    /// 1. `IX` on the table (ensures it outlives the whole insert).
    /// 2. For each index, wait out any other transaction's gap lock on the
    ///    row's insertion point.
    /// 3. Insert the record.
    /// 4. Insert the record's key into each index.
    /// 5. Append a [`WriteRecord::insert`] so abort can undo it.
    pub fn insert(&self, txn: &Transaction, table_fd: i32, table_name: &str) -> LockResult<Rid> {
        self.lock_manager.lock_ix_table(txn, LockDataId::table(table_fd))?;

        let index_count = self.backend.index_count(table_fd);
        for index in 0..index_count {
            let lower = self.backend.lower_bound(table_fd, index);
            self.lock_manager.await_index_gap(txn, LockDataId::gap(table_fd, lower))?;
        }

        let rid = self.backend.insert_record(table_fd);

        for index in 0..index_count {
            self.backend.insert_into_index(table_fd, index, rid);
        }

        txn.append_write_record(WriteRecord::insert(table_name, rid));
        Ok(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// A fake table backend: a slot counter for rids and a record of what
    /// got inserted where, good enough to exercise the coordinator's call
    /// order without a real storage engine.
    struct FakeTable {
        next_slot: Mutex<i32>,
        index_positions: Vec<Rid>,
        inserted: Mutex<HashMap<usize, Vec<Rid>>>,
    }

    impl FakeTable {
        fn new(index_positions: Vec<Rid>) -> Self {
            Self { next_slot: Mutex::new(0), index_positions, inserted: Mutex::new(HashMap::new()) }
        }
    }

    impl IndexGapSource for FakeTable {
        fn index_count(&self, _table_fd: i32) -> usize {
            self.index_positions.len()
        }

        fn lower_bound(&self, _table_fd: i32, index: usize) -> Rid {
            self.index_positions[index]
        }
    }

    impl RecordInserter for FakeTable {
        fn insert_record(&self, _table_fd: i32) -> Rid {
            let mut slot = self.next_slot.lock();
            let rid = Rid::new(0, *slot);
            *slot += 1;
            rid
        }

        fn insert_into_index(&self, _table_fd: i32, index: usize, rid: Rid) {
            self.inserted.lock().entry(index).or_default().push(rid);
        }
    }

    #[test]
    fn insert_takes_ix_and_writes_every_index() {
        let lm = LockManager::new();
        let txn = Transaction::new(1);
        let table = FakeTable::new(vec![Rid::new(0, 5), Rid::new(0, 9)]);
        let coordinator = InsertGapCoordinator::new(&lm, &table);

        let rid = coordinator.insert(&txn, 7, "widgets").unwrap();

        assert_eq!(lm.lock_mode_held_by(LockDataId::table(7), 1), Some(crate::transaction::types::LockMode::IntentionExclusive));
        assert_eq!(table.inserted.lock().get(&0).unwrap(), &vec![rid]);
        assert_eq!(table.inserted.lock().get(&1).unwrap(), &vec![rid]);
        assert_eq!(txn.write_set().len(), 1);
        assert_eq!(txn.write_set()[0].table_name, "widgets");
    }

    #[test]
    fn concurrent_inserter_waits_for_older_scanners_gap_lock() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let lm = Arc::new(LockManager::new());
        let scanner = Arc::new(Transaction::new(1));
        let inserter_txn = Arc::new(Transaction::new(5));
        let gap = LockDataId::gap(3, Rid::new(0, 0));

        lm.lock_gap_index(&scanner, gap).unwrap();

        let table = Arc::new(FakeTable::new(vec![Rid::new(0, 0)]));
        let lm2 = Arc::clone(&lm);
        let table2 = Arc::clone(&table);
        let txn2 = Arc::clone(&inserter_txn);
        let handle = thread::spawn(move || {
            let coordinator = InsertGapCoordinator::new(&lm2, &*table2);
            coordinator.insert(&txn2, 3, "orders")
        });

        thread::sleep(Duration::from_millis(50));
        lm.unlock(&scanner, gap).unwrap();

        assert!(handle.join().unwrap().is_ok());
    }
}
