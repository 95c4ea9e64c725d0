//! Trait seam for the lock manager, kept for the same reason the rest of
//! this module's traits exist: so a test can substitute a mock without
//! depending on `LockManager`'s internals.

use crate::common::TransactionId;

use super::error::LockResult;
use super::types::{LockDataId, LockMode, Transaction};

/// Operations a lock manager must provide. Implemented by
/// [`super::lock_manager::LockManager`]; exists mainly so tests for
/// higher-level code (e.g. [`super::gap::InsertGapCoordinator`]) can be
/// written against a trait object instead of the concrete manager.
pub trait LockManagement: Send + Sync {
    /// Releases every lock `txn` holds, in no particular order. Used by
    /// commit/abort; idempotent on an already-released resource.
    fn unlock(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool>;

    /// Whether `resource` currently has any lock granted on it.
    fn is_locked(&self, resource: LockDataId) -> bool;

    /// The strongest mode `txn_id` holds on `resource`, if any.
    fn lock_mode_held_by(&self, resource: LockDataId, txn_id: TransactionId) -> Option<LockMode>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::lock_manager::LockManager;

    #[test]
    fn lock_manager_implements_lock_management() {
        fn assert_impl<T: LockManagement>() {}
        assert_impl::<LockManager>();
    }

    #[test]
    fn unlocked_resource_reports_not_locked() {
        let manager = LockManager::new();
        let table = LockDataId::table(1);
        assert!(!LockManagement::is_locked(&manager, table));
    }
}
