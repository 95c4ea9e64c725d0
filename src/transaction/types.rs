//! The lock-mode lattice, resource identifiers, transaction state machine,
//! and write-set bookkeeping the lock manager operates on.
//!
//! Six lock modes cover the table/record/gap hierarchy this crate manages:
//!
//! ```text
//! IS    intention share   — "a descendant of mine will take S"
//! IX    intention exclusive — "a descendant of mine will take X"
//! S     shared
//! SIX   shared + intention exclusive ("I read the whole table, I'll write some rows")
//! X     exclusive
//! GAP   next-key / insertion-phantom guard, orthogonal to the other five
//! ```
//!
//! [`GroupMode`] is the same lattice plus a `None` bottom, used to summarize
//! an entire [`super::lock_manager::LockRequestQueue`] as a single value —
//! the strongest mode currently granted on a resource.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::common::{LogSequenceNumber, Rid, TransactionId};

/// A lock mode a transaction can hold on a table, a record, or a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
    Gap,
}

impl LockMode {
    /// Short code used in logs and `Display`, matching the vocabulary used
    /// throughout this module's documentation (`IS`, `IX`, `S`, `SIX`, `X`, `GAP`).
    pub fn code(self) -> &'static str {
        match self {
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::SharedIntentionExclusive => "SIX",
            LockMode::Exclusive => "X",
            LockMode::Gap => "GAP",
        }
    }

    /// Whether a fresh request for `self` is compatible with a queue whose
    /// current [`GroupMode`] is `group`. `group` being the *strongest*
    /// granted mode on the resource is sufficient here: invariant I2 (all
    /// granted requests are pairwise compatible) guarantees the strongest
    /// granted mode dominates every weaker one also present, so there is no
    /// need to walk the whole queue for a conflict check — only for picking
    /// a wait-die arbitration partner once a conflict is known to exist.
    pub fn compatible_with_group(self, group: GroupMode) -> bool {
        use GroupMode as G;
        use LockMode::*;
        match group {
            G::None => true,
            G::Exclusive => false,
            G::Gap | G::IntentionShared => !matches!(self, Exclusive),
            G::IntentionExclusive => matches!(self, IntentionShared | IntentionExclusive | Gap),
            G::Shared => matches!(self, IntentionShared | Shared | Gap),
            G::SharedIntentionExclusive => matches!(self, IntentionShared | Gap),
        }
    }

    /// The mode an in-place upgrade from `held` to `requested` produces, if
    /// that pair is one of the six admissible upgrades (or a no-op).
    /// Returns `None` for any pair that is not a recognized upgrade — the
    /// caller is responsible for checking admissibility (queue occupancy,
    /// other holders) separately; this only answers "what mode results".
    pub fn upgrade_target(held: LockMode, requested: LockMode) -> Option<LockMode> {
        use LockMode::*;
        match (held, requested) {
            (h, r) if h == r => Some(h),
            (Shared, IntentionExclusive) | (IntentionExclusive, Shared) => {
                Some(SharedIntentionExclusive)
            }
            (IntentionShared, Shared) => Some(Shared),
            (IntentionShared, IntentionExclusive) => Some(IntentionExclusive),
            (IntentionShared, Exclusive)
            | (Shared, Exclusive)
            | (IntentionExclusive, Exclusive)
            | (SharedIntentionExclusive, Exclusive) => Some(Exclusive),
            _ => None,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Summary of every granted request on one resource: the strongest mode
/// currently held, or `None` if nobody holds anything.
///
/// Declaration order here *is* the dominance order used to recompute this
/// value after a release (`None < Gap < IS < IX < S < SIX < X`), so
/// `Ord`/`PartialOrd` fall out of `#[derive]` without restating the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupMode {
    None,
    Gap,
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl From<LockMode> for GroupMode {
    fn from(mode: LockMode) -> Self {
        match mode {
            LockMode::IntentionShared => GroupMode::IntentionShared,
            LockMode::IntentionExclusive => GroupMode::IntentionExclusive,
            LockMode::Shared => GroupMode::Shared,
            LockMode::SharedIntentionExclusive => GroupMode::SharedIntentionExclusive,
            LockMode::Exclusive => GroupMode::Exclusive,
            LockMode::Gap => GroupMode::Gap,
        }
    }
}

/// The kind of resource a [`LockDataId`] names. Table and record locks share
/// the six-mode lattice; gap locks only ever use [`LockMode::Gap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockDataType {
    Table,
    Record,
    Gap,
}

/// A resource the lock manager can grant locks on: a whole table, one
/// record, or one index gap position.
///
/// Unlike the source this crate's semantics were distilled from — which
/// packs table id and row/slot into a single 64-bit integer for hashing —
/// this is a plain tagged union. `#[derive(Hash, Eq)]` gives structural
/// equality for free and the three cases can never be confused with each
/// other at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockDataId {
    Table { table_fd: i32 },
    Record { table_fd: i32, rid: Rid },
    Gap { table_fd: i32, iid: Rid },
}

impl LockDataId {
    pub const fn table(table_fd: i32) -> Self {
        LockDataId::Table { table_fd }
    }

    pub const fn record(table_fd: i32, rid: Rid) -> Self {
        LockDataId::Record { table_fd, rid }
    }

    pub const fn gap(table_fd: i32, iid: Rid) -> Self {
        LockDataId::Gap { table_fd, iid }
    }

    pub fn data_type(self) -> LockDataType {
        match self {
            LockDataId::Table { .. } => LockDataType::Table,
            LockDataId::Record { .. } => LockDataType::Record,
            LockDataId::Gap { .. } => LockDataType::Gap,
        }
    }
}

impl fmt::Display for LockDataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockDataId::Table { table_fd } => write!(f, "table({table_fd})"),
            LockDataId::Record { table_fd, rid } => write!(f, "record({table_fd}, {rid})"),
            LockDataId::Gap { table_fd, iid } => write!(f, "gap({table_fd}, {iid})"),
        }
    }
}

/// A transaction's position in the strict two-phase locking state machine.
///
/// `Default` is the pre-first-lock state; the first successful lock request
/// moves a transaction to `Growing`. Any release moves it to `Shrinking`,
/// after which no further lock *requests* are admissible (see
/// [`super::error::TransactionError::LockOnShrinking`]). `Committed` and
/// `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Default => "DEFAULT",
            TransactionState::Growing => "GROWING",
            TransactionState::Shrinking => "SHRINKING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// The kind of change a [`WriteRecord`] describes, needed to know how to
/// undo it if the owning transaction aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Delete,
    Update,
}

/// One entry in a transaction's write set: enough to undo the write on
/// abort. `before_image` is `None` for `Insert` (there is nothing to
/// restore — undoing an insert is a delete) and `Some` for `Delete`/`Update`.
///
/// `table_name` rather than the lock manager's own `table_fd` identifies the
/// table: rollback replays against the table by name, the same identifier
/// the original engine's write set carries, not the lock table's internal
/// file-descriptor key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRecord {
    pub kind: WriteKind,
    pub table_name: String,
    pub rid: Rid,
    pub before_image: Option<Vec<u8>>,
}

impl WriteRecord {
    pub fn insert(table_name: impl Into<String>, rid: Rid) -> Self {
        Self { kind: WriteKind::Insert, table_name: table_name.into(), rid, before_image: None }
    }

    pub fn delete(table_name: impl Into<String>, rid: Rid, before_image: Vec<u8>) -> Self {
        Self { kind: WriteKind::Delete, table_name: table_name.into(), rid, before_image: Some(before_image) }
    }

    pub fn update(table_name: impl Into<String>, rid: Rid, before_image: Vec<u8>) -> Self {
        Self { kind: WriteKind::Update, table_name: table_name.into(), rid, before_image: Some(before_image) }
    }
}

/// A single transaction: its id, its position in the SS2PL state machine,
/// the set of resources it currently holds locks on, and its write set.
///
/// `state`, `held`, and `write_set` are each independently mutexed rather
/// than grouped under one lock: the lock manager needs to flip `state` and
/// touch `held` from inside operations that are themselves holding the
/// manager's own table lock, and keeping these narrow avoids ever having to
/// reason about lock ordering between a `Transaction`'s internals and the
/// manager's.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: Mutex<TransactionState>,
    held: Mutex<HashSet<LockDataId>>,
    write_set: Mutex<Vec<WriteRecord>>,
    prev_lsn: Mutex<LogSequenceNumber>,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Default),
            held: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
            prev_lsn: Mutex::new(0),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Runs `f` under the state mutex, letting the lock manager perform a
    /// read-then-maybe-transition atomically without a second lock/unlock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TransactionState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn held_locks(&self) -> HashSet<LockDataId> {
        self.held.lock().clone()
    }

    pub fn holds(&self, id: LockDataId) -> bool {
        self.held.lock().contains(&id)
    }

    pub(crate) fn insert_held(&self, id: LockDataId) {
        self.held.lock().insert(id);
    }

    pub(crate) fn remove_held(&self, id: LockDataId) {
        self.held.lock().remove(&id);
    }

    pub fn write_set(&self) -> Vec<WriteRecord> {
        self.write_set.lock().clone()
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    pub fn prev_lsn(&self) -> LogSequenceNumber {
        *self.prev_lsn.lock()
    }

    pub fn set_prev_lsn(&self, lsn: LogSequenceNumber) {
        *self.prev_lsn.lock() = lsn;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_matrix_matches_table() {
        use GroupMode as G;
        use LockMode::*;

        assert!(IntentionShared.compatible_with_group(G::IntentionExclusive));
        assert!(!Shared.compatible_with_group(G::IntentionExclusive));
        assert!(IntentionExclusive.compatible_with_group(G::IntentionExclusive));
        assert!(!SharedIntentionExclusive.compatible_with_group(G::Shared));
        assert!(Gap.compatible_with_group(G::SharedIntentionExclusive));
        assert!(!Exclusive.compatible_with_group(G::Gap));
        assert!(Exclusive.compatible_with_group(G::None));
    }

    #[test]
    fn group_mode_dominance_order() {
        assert!(GroupMode::None < GroupMode::Gap);
        assert!(GroupMode::Gap < GroupMode::IntentionShared);
        assert!(GroupMode::IntentionShared < GroupMode::IntentionExclusive);
        assert!(GroupMode::IntentionExclusive < GroupMode::Shared);
        assert!(GroupMode::Shared < GroupMode::SharedIntentionExclusive);
        assert!(GroupMode::SharedIntentionExclusive < GroupMode::Exclusive);
    }

    #[test]
    fn upgrade_targets_match_admissible_pairs() {
        use LockMode::*;
        assert_eq!(LockMode::upgrade_target(Shared, IntentionExclusive), Some(SharedIntentionExclusive));
        assert_eq!(LockMode::upgrade_target(IntentionExclusive, Shared), Some(SharedIntentionExclusive));
        assert_eq!(LockMode::upgrade_target(IntentionShared, Shared), Some(Shared));
        assert_eq!(LockMode::upgrade_target(IntentionShared, Exclusive), Some(Exclusive));
        assert_eq!(LockMode::upgrade_target(IntentionShared, IntentionExclusive), Some(IntentionExclusive));
        assert_eq!(LockMode::upgrade_target(Shared, Exclusive), Some(Exclusive));
        assert_eq!(LockMode::upgrade_target(Shared, IntentionShared), None);
    }

    #[test]
    fn transaction_tracks_held_set_and_state() {
        let txn = Transaction::new(1);
        assert_eq!(txn.state(), TransactionState::Default);
        txn.set_state(TransactionState::Growing);
        let id = LockDataId::table(7);
        txn.insert_held(id);
        assert!(txn.holds(id));
        txn.remove_held(id);
        assert!(!txn.holds(id));
    }
}
