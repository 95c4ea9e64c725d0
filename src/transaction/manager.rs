//! Transaction lifecycle: assigning ids, tracking active transactions, and
//! releasing every lock a transaction holds on commit or abort.
//!
//! `begin`/`commit`/`abort` is the only lifecycle this crate models — no
//! savepoints, no nested transactions, no isolation-level selection (SS2PL
//! fixes the isolation this lock manager provides; there is nothing to
//! choose between).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::TransactionId;
use crate::error::{DbError, Result};
use crate::transaction::lock_manager::LockManager;
use crate::transaction::traits::LockManagement;
use crate::transaction::types::{Transaction, TransactionState};

/// Coordinates transaction begin/commit/abort against a shared
/// [`LockManager`]. Ids are assigned in strictly increasing order, which is
/// also how the lock manager's wait-die arbitration reads "age".
pub struct TransactionManager {
    next_txn_id: Mutex<TransactionId>,
    active_txns: RwLock<HashMap<TransactionId, Arc<Transaction>>>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: Mutex::new(1),
            active_txns: RwLock::new(HashMap::new()),
            lock_manager: Arc::new(LockManager::new()),
        }
    }

    /// Creates a manager around a lock manager shared with other
    /// subsystems (e.g. an executor that also needs `Arc<LockManager>`
    /// directly for gap-lock coordination).
    pub fn with_lock_manager(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: Mutex::new(1),
            active_txns: RwLock::new(HashMap::new()),
            lock_manager,
        }
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.lock_manager)
    }

    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = {
            let mut next_id = self.next_txn_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let txn = Arc::new(Transaction::new(txn_id));
        self.active_txns.write().insert(txn_id, Arc::clone(&txn));
        tracing::debug!(txn_id, "transaction began");
        txn
    }

    /// Releases every lock the transaction holds and marks it committed.
    pub fn commit(&self, txn_id: TransactionId) -> Result<()> {
        let txn = self.require_active(txn_id)?;
        self.release_all(&txn)?;
        txn.set_state(TransactionState::Committed);
        self.active_txns.write().remove(&txn_id);
        tracing::debug!(txn_id, "transaction committed");
        Ok(())
    }

    /// Releases every lock the transaction holds and marks it aborted.
    /// Undoing the transaction's writes (via [`Transaction::write_set`]) is
    /// the caller's responsibility — this crate owns locking, not storage.
    pub fn abort(&self, txn_id: TransactionId) -> Result<()> {
        let txn = self.require_active(txn_id)?;
        self.release_all(&txn)?;
        txn.set_state(TransactionState::Aborted);
        self.active_txns.write().remove(&txn_id);
        tracing::debug!(txn_id, "transaction aborted");
        Ok(())
    }

    fn release_all(&self, txn: &Transaction) -> Result<()> {
        for resource in txn.held_locks() {
            self.lock_manager.unlock(txn, resource)?;
        }
        Ok(())
    }

    fn require_active(&self, txn_id: TransactionId) -> Result<Arc<Transaction>> {
        self.active_txns
            .read()
            .get(&txn_id)
            .cloned()
            .ok_or_else(|| DbError::InvalidArgument(format!("transaction {txn_id} is not active")))
    }

    pub fn get(&self, txn_id: TransactionId) -> Option<Arc<Transaction>> {
        self.active_txns.read().get(&txn_id).cloned()
    }

    pub fn state(&self, txn_id: TransactionId) -> Option<TransactionState> {
        self.active_txns.read().get(&txn_id).map(|t| t.state())
    }

    pub fn is_active(&self, txn_id: TransactionId) -> bool {
        self.active_txns.read().contains_key(&txn_id)
    }

    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    pub fn active_transaction_ids(&self) -> Vec<TransactionId> {
        self.active_txns.read().keys().copied().collect()
    }

    /// The oldest still-active transaction id, i.e. the one every other
    /// active transaction would lose to under wait-die.
    pub fn min_active_txn(&self) -> Option<TransactionId> {
        self.active_txns.read().keys().min().copied()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("next_txn_id", &*self.next_txn_id.lock())
            .finish()
    }
}
