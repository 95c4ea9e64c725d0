//! Errors the lock manager can raise. All three correspond to a required
//! transaction abort — there is no "retry later" outcome here, only grant,
//! benign no-op, or abort.

use thiserror::Error;

use crate::common::TransactionId;
use crate::transaction::types::{LockDataId, TransactionState};

#[derive(Debug, Error)]
pub enum TransactionError {
    /// A transaction already in the shrinking phase asked for a new lock.
    /// Strict two-phase locking forbids this outright; SS2PL additionally
    /// forbids a transaction from ever entering shrinking before commit or
    /// abort, so in practice this only fires for a transaction racing its
    /// own abort.
    #[error("txn {txn_id} aborted: lock request on {resource} while SHRINKING")]
    LockOnShrinking { txn_id: TransactionId, resource: LockDataId },

    /// A transaction is younger than the holder it would have to wait on
    /// for `resource` and is killed outright under wait-die rather than
    /// queued, to keep the wait graph acyclic.
    #[error("txn {txn_id} aborted for deadlock prevention: younger than {held_by} on {resource}")]
    DeadlockPrevention {
        txn_id: TransactionId,
        held_by: TransactionId,
        resource: LockDataId,
    },

    /// Two transactions raced an in-place upgrade on the same resource and
    /// the wait-die tie-break could not be resolved age-for-age — this
    /// indicates the queue's invariant (at most one request per resource
    /// per transaction) was violated and the manager refuses to guess.
    #[error("txn {txn_id} aborted: upgrade conflict on {resource}")]
    UpgradeConflict { txn_id: TransactionId, resource: LockDataId },

    /// The lock table entered a state the manager has no recovery path
    /// for (e.g. a transaction's own request vanished from its queue
    /// between the self-check and the grant). Always a bug, never a user
    /// error.
    #[error("txn {txn_id}: internal lock-table corruption while in state {state}")]
    InternalStateCorruption { txn_id: TransactionId, state: TransactionState },
}

pub type LockResult<T> = std::result::Result<T, TransactionError>;
