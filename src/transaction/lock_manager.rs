//! The lock table: one process-wide mutex guarding a map from resource to
//! its request queue, plus a per-queue condition variable for waiters.
//!
//! Every operation below follows the same shape: check the caller's SS2PL
//! state, look up (or create) the resource's queue, decide whether the
//! request is compatible with what is already granted, and if not, either
//! block on the queue's condvar or die immediately under wait-die. The
//! nine operations differ only in which mode they request, which other
//! mode(s) they conflict with, and — for the six in-place upgrades — what
//! resulting mode an upgrade produces.
//!
//! A request only ever appears in a queue once it has been granted; a
//! transaction that has to wait is not represented by a placeholder entry,
//! it simply blocks on the queue's condvar and re-checks the same
//! compatibility test used for a fresh request on every wake.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::TransactionId;
use crate::transaction::error::{LockResult, TransactionError};
use crate::transaction::statistics::LockStatistics;
use crate::transaction::traits::LockManagement;
use crate::transaction::types::{GroupMode, LockDataId, LockMode, Transaction, TransactionState};

/// One granted request sitting in a [`LockRequestQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub txn_id: TransactionId,
    pub mode: LockMode,
    pub granted: bool,
}

/// The request queue for a single resource: who holds what, and the
/// strongest mode currently granted (see [`GroupMode`]).
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    group_mode: GroupMode,
    condvar: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            group_mode: GroupMode::None,
            condvar: Arc::new(Condvar::new()),
        }
    }

    fn recompute_group_mode(&mut self) {
        self.group_mode = self
            .requests
            .iter()
            .map(|r| GroupMode::from(r.mode))
            .max()
            .unwrap_or(GroupMode::None);
    }

    fn other_holds(&self, txn_id: TransactionId, modes: &[LockMode]) -> bool {
        self.requests
            .iter()
            .any(|r| r.txn_id != txn_id && modes.contains(&r.mode))
    }

    fn find_own(&self, txn_id: TransactionId) -> Option<LockRequest> {
        self.requests.iter().copied().find(|r| r.txn_id == txn_id)
    }

    fn find_other(&self, txn_id: TransactionId, matches: impl Fn(&LockRequest) -> bool) -> Option<TransactionId> {
        self.requests
            .iter()
            .find(|r| r.txn_id != txn_id && matches(r))
            .map(|r| r.txn_id)
    }
}

type LockTable = HashMap<LockDataId, LockRequestQueue>;

/// `group_mode` of `resource`'s queue, or `None` if the queue has been
/// garbage-collected (the last holder released and nobody has granted a
/// fresh request since) — used inside wait-die predicates, which may run
/// after the queue they were checking has been removed out from under them.
fn group_mode_of(table: &LockTable, resource: LockDataId) -> GroupMode {
    table.get(&resource).map(|q| q.group_mode).unwrap_or(GroupMode::None)
}

/// The lock manager: a single `Mutex`-guarded table of resource queues. All
/// nine lock operations and unlock serialize on this one mutex, exactly
/// long enough to inspect or mutate a queue — a thread waiting for a
/// conflicting lock to be released blocks on that queue's [`Condvar`],
/// which atomically releases this mutex for the duration of the wait.
pub struct LockManager {
    table: Mutex<LockTable>,
    stats: LockStatistics,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            stats: LockStatistics::new(),
        }
    }

    pub fn stats(&self) -> &LockStatistics {
        &self.stats
    }

    // ---- common preamble -------------------------------------------------

    /// Checks and updates `txn`'s SS2PL state for a lock *request*. Returns
    /// `Ok(false)` if the transaction is already terminal (benign no-op —
    /// a commit/abort racing a straggling lock request is not an error),
    /// `Err` if the transaction is shrinking (a real protocol violation),
    /// and `Ok(true)` to proceed, having moved `Default` transactions into
    /// `Growing`.
    fn enter_growing_or_fail(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        txn.with_state(|state| match *state {
            TransactionState::Committed | TransactionState::Aborted => Ok(false),
            TransactionState::Default => {
                *state = TransactionState::Growing;
                Ok(true)
            }
            TransactionState::Growing => Ok(true),
            TransactionState::Shrinking => Err(TransactionError::LockOnShrinking {
                txn_id: txn.id(),
                resource,
            }),
        })
    }

    /// Checks and updates `txn`'s SS2PL state for a release. Returns
    /// `Ok(false)` for an already-terminal transaction (idempotent),
    /// otherwise moves `Default`/`Growing` into `Shrinking` and proceeds.
    fn enter_shrinking_or_fail(&self, txn: &Transaction) -> LockResult<bool> {
        txn.with_state(|state| match *state {
            TransactionState::Committed | TransactionState::Aborted => Ok(false),
            TransactionState::Shrinking => Ok(true),
            TransactionState::Default | TransactionState::Growing => {
                *state = TransactionState::Shrinking;
                Ok(true)
            }
        })
    }

    /// Blocks `txn` on `resource`'s condvar under wait-die: if `txn` is
    /// older than `holder` (lower id), it waits until `predicate` holds;
    /// otherwise it is killed immediately to keep the waits-for graph
    /// acyclic.
    fn wait_die(
        &self,
        txn: &Transaction,
        holder: TransactionId,
        resource: LockDataId,
        guard: &mut MutexGuard<'_, LockTable>,
        mut predicate: impl FnMut(&mut LockTable) -> bool,
    ) -> LockResult<()> {
        if txn.id() < holder {
            tracing::debug!(txn_id = txn.id(), holder, %resource, "wait-die: waiting (older)");
            self.stats.record_wait();
            let cvar = guard
                .get(&resource)
                .expect("queue must exist for a resource being waited on")
                .condvar
                .clone();
            // parking_lot::Condvar has no wait_while; loop the predicate by
            // hand, re-checking after every (possibly spurious) wakeup.
            while !predicate(&mut **guard) {
                cvar.wait(guard);
            }
            Ok(())
        } else {
            tracing::warn!(txn_id = txn.id(), holder, %resource, "wait-die: aborting (younger)");
            self.stats.record_die();
            Err(TransactionError::DeadlockPrevention {
                txn_id: txn.id(),
                held_by: holder,
                resource,
            })
        }
    }

    fn grant(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>, mode: LockMode) {
        let queue = guard.entry(resource).or_insert_with(LockRequestQueue::new);
        queue.requests.push_back(LockRequest { txn_id: txn.id(), mode, granted: true });
        queue.group_mode = queue.group_mode.max(GroupMode::from(mode));
        txn.insert_held(resource);
        self.stats.record_grant();
        tracing::trace!(txn_id = txn.id(), %resource, mode = %mode, "granted");
    }

    // ---- record locks ------------------------------------------------------

    /// `IS`/`IX` never apply to records directly in this model: a record
    /// is locked `S` or `X`, with the table-level intention locks taken
    /// separately first. See [`Self::lock_is_table`]/[`Self::lock_ix_table`].
    pub fn lock_shared_record(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if guard.get(&resource).unwrap().find_own(txn.id()).is_some() {
            return Ok(true);
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::Shared.compatible_with_group(group) {
            let holder = guard
                .get(&resource)
                .unwrap()
                .find_other(txn.id(), |r| r.mode == LockMode::Exclusive);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::Shared.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::Shared);
        Ok(true)
    }

    pub fn lock_exclusive_record(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if let Some(existing) = guard.get(&resource).unwrap().find_own(txn.id()) {
            if existing.mode == LockMode::Exclusive {
                return Ok(true);
            }
            // S -> X upgrade: admissible only if this transaction is the sole holder.
            if guard.get(&resource).unwrap().requests.len() > 1 {
                let holder = guard
                    .get(&resource)
                    .unwrap()
                    .find_other(txn.id(), |_| true)
                    .expect("len > 1 implies another holder exists");
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    table.get(&resource).unwrap().requests.len() == 1
                })?;
            }
            let queue = guard.get_mut(&resource).unwrap();
            let req = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()).unwrap();
            req.mode = LockMode::Exclusive;
            queue.recompute_group_mode();
            self.stats.record_upgrade();
            tracing::trace!(txn_id = txn.id(), %resource, "upgraded S -> X");
            return Ok(true);
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::Exclusive.compatible_with_group(group) {
            let holder = guard.get(&resource).unwrap().requests.front().map(|r| r.txn_id);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::Exclusive.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::Exclusive);
        Ok(true)
    }

    // ---- gap locks -----------------------------------------------------

    /// Grants a GAP lock; GAP is compatible with everything except `X`, and
    /// two GAP holders on the same position never conflict with each other.
    pub fn lock_gap_index(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if guard.get(&resource).unwrap().find_own(txn.id()).is_some() {
            return Ok(true);
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::Gap.compatible_with_group(group) {
            let holder = guard
                .get(&resource)
                .unwrap()
                .find_other(txn.id(), |r| r.mode == LockMode::Exclusive);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::Gap.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::Gap);
        Ok(true)
    }

    /// Waits for any *other* transaction's gap lock on `resource` to clear,
    /// without taking a lock itself. Used by the insert path to wait out a
    /// concurrent range-scan's gap lock before inserting into that gap —
    /// it grants nothing because the inserter does not need to hold the
    /// gap once its own insert is visible.
    pub fn await_index_gap(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        let holder = guard.get(&resource).unwrap().find_other(txn.id(), |_| true);
        if let Some(holder) = holder {
            self.wait_die(txn, holder, resource, &mut guard, |table| {
                table
                    .get(&resource)
                    .map(|q| q.requests.iter().all(|r| r.txn_id == txn.id()))
                    .unwrap_or(true)
            })?;
        }
        Ok(true)
    }

    // ---- table locks -----------------------------------------------------

    pub fn lock_is_table(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if guard.get(&resource).unwrap().find_own(txn.id()).is_some() {
            return Ok(true);
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::IntentionShared.compatible_with_group(group) {
            let holder = guard
                .get(&resource)
                .unwrap()
                .find_other(txn.id(), |r| r.mode == LockMode::Exclusive);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::IntentionShared.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::IntentionShared);
        Ok(true)
    }

    pub fn lock_ix_table(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if let Some(existing) = guard.get(&resource).unwrap().find_own(txn.id()) {
            match existing.mode {
                LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
                | LockMode::Exclusive => return Ok(true),
                LockMode::IntentionShared => {
                    self.upgrade_ix_from_is(txn, resource, &mut guard)?;
                    return Ok(true);
                }
                LockMode::Shared => {
                    self.upgrade_six_from_s(txn, resource, &mut guard)?;
                    return Ok(true);
                }
                LockMode::Gap => unreachable!("gap locks never coexist with table-mode requests on a table resource"),
            }
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::IntentionExclusive.compatible_with_group(group) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| {
                matches!(r.mode, LockMode::Shared | LockMode::SharedIntentionExclusive | LockMode::Exclusive)
            });
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::IntentionExclusive.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::IntentionExclusive);
        Ok(true)
    }

    pub fn lock_shared_table(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if let Some(existing) = guard.get(&resource).unwrap().find_own(txn.id()) {
            match existing.mode {
                LockMode::Shared | LockMode::SharedIntentionExclusive | LockMode::Exclusive => {
                    return Ok(true)
                }
                LockMode::IntentionShared => {
                    self.upgrade_s_from_is(txn, resource, &mut guard)?;
                    return Ok(true);
                }
                LockMode::IntentionExclusive => {
                    self.upgrade_six_from_ix(txn, resource, &mut guard)?;
                    return Ok(true);
                }
                LockMode::Gap => unreachable!("gap locks never coexist with table-mode requests on a table resource"),
            }
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::Shared.compatible_with_group(group) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| {
                matches!(r.mode, LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive | LockMode::Exclusive)
            });
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::Shared.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::Shared);
        Ok(true)
    }

    pub fn lock_exclusive_table(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        self.stats.record_request();
        if !self.enter_growing_or_fail(txn, resource)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        guard.entry(resource).or_insert_with(LockRequestQueue::new);

        if let Some(existing) = guard.get(&resource).unwrap().find_own(txn.id()) {
            if existing.mode == LockMode::Exclusive {
                return Ok(true);
            }
            self.upgrade_x_from_any(txn, resource, &mut guard)?;
            return Ok(true);
        }

        let group = guard.get(&resource).unwrap().group_mode;
        if !LockMode::Exclusive.compatible_with_group(group) {
            let holder = guard.get(&resource).unwrap().requests.front().map(|r| r.txn_id);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, &mut guard, |table| {
                    LockMode::Exclusive.compatible_with_group(group_mode_of(table, resource))
                })?;
            }
        }

        self.grant(txn, resource, &mut guard, LockMode::Exclusive);
        Ok(true)
    }

    // ---- in-place upgrades -------------------------------------------------
    //
    // Each of these assumes the caller already confirmed `txn` holds the
    // "from" mode on `resource` and the queue entry exists.

    fn upgrade_ix_from_is(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>) -> LockResult<()> {
        // IS -> IX admissible iff nobody else holds a mode outside {IS, IX}.
        let admissible = |q: &LockRequestQueue| matches!(q.group_mode, GroupMode::IntentionShared | GroupMode::IntentionExclusive);
        if !admissible(guard.get(&resource).unwrap()) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| {
                !matches!(r.mode, LockMode::IntentionShared | LockMode::IntentionExclusive)
            });
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, guard, |table| admissible(table.get(&resource).unwrap()))?;
            }
        }
        self.commit_upgrade(txn, resource, guard, LockMode::IntentionExclusive)
    }

    fn upgrade_six_from_s(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>) -> LockResult<()> {
        // S -> SIX admissible iff no other transaction holds S.
        let admissible = |txn_id, q: &LockRequestQueue| !q.other_holds(txn_id, &[LockMode::Shared]);
        if !admissible(txn.id(), guard.get(&resource).unwrap()) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| r.mode == LockMode::Shared);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, guard, |table| admissible(txn.id(), table.get(&resource).unwrap()))?;
            }
        }
        self.commit_upgrade(txn, resource, guard, LockMode::SharedIntentionExclusive)
    }

    fn upgrade_s_from_is(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>) -> LockResult<()> {
        // IS -> S admissible iff nobody else holds a mode outside {IS, S}.
        let admissible = |q: &LockRequestQueue| matches!(q.group_mode, GroupMode::IntentionShared | GroupMode::Shared);
        if !admissible(guard.get(&resource).unwrap()) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| {
                !matches!(r.mode, LockMode::IntentionShared | LockMode::Shared)
            });
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, guard, |table| admissible(table.get(&resource).unwrap()))?;
            }
        }
        self.commit_upgrade(txn, resource, guard, LockMode::Shared)
    }

    fn upgrade_six_from_ix(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>) -> LockResult<()> {
        // IX -> SIX admissible iff no other transaction holds IX.
        let admissible = |txn_id, q: &LockRequestQueue| !q.other_holds(txn_id, &[LockMode::IntentionExclusive]);
        if !admissible(txn.id(), guard.get(&resource).unwrap()) {
            let holder = guard.get(&resource).unwrap().find_other(txn.id(), |r| r.mode == LockMode::IntentionExclusive);
            if let Some(holder) = holder {
                self.wait_die(txn, holder, resource, guard, |table| admissible(txn.id(), table.get(&resource).unwrap()))?;
            }
        }
        self.commit_upgrade(txn, resource, guard, LockMode::SharedIntentionExclusive)
    }

    fn upgrade_x_from_any(&self, txn: &Transaction, resource: LockDataId, guard: &mut MutexGuard<'_, LockTable>) -> LockResult<()> {
        // Any mode -> X admissible iff this transaction is the sole holder.
        if guard.get(&resource).unwrap().requests.len() > 1 {
            let holder = guard
                .get(&resource)
                .unwrap()
                .find_other(txn.id(), |_| true)
                .expect("len > 1 implies another holder exists");
            self.wait_die(txn, holder, resource, guard, |table| table.get(&resource).unwrap().requests.len() == 1)?;
        }
        self.commit_upgrade(txn, resource, guard, LockMode::Exclusive)
    }

    fn commit_upgrade(
        &self,
        txn: &Transaction,
        resource: LockDataId,
        guard: &mut MutexGuard<'_, LockTable>,
        to: LockMode,
    ) -> LockResult<()> {
        let queue = guard.get_mut(&resource).expect("queue must still exist after a successful upgrade wait");
        let req = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id())
            .ok_or(TransactionError::InternalStateCorruption { txn_id: txn.id(), state: txn.state() })?;
        debug_assert!(
            LockMode::upgrade_target(req.mode, to) == Some(to) || LockMode::upgrade_target(to, req.mode) == Some(to),
            "unrecognized upgrade pair {:?} -> {:?}",
            req.mode,
            to
        );
        req.mode = to;
        queue.recompute_group_mode();
        self.stats.record_upgrade();
        tracing::trace!(txn_id = txn.id(), %resource, mode = %to, "upgraded");
        Ok(())
    }
}

impl LockManagement for LockManager {
    fn unlock(&self, txn: &Transaction, resource: LockDataId) -> LockResult<bool> {
        if !self.enter_shrinking_or_fail(txn)? {
            return Ok(false);
        }

        let mut guard = self.table.lock();
        let Some(queue) = guard.get_mut(&resource) else {
            return Ok(true);
        };
        queue.requests.retain(|r| r.txn_id != txn.id());
        queue.recompute_group_mode();
        let cvar = queue.condvar.clone();
        let is_empty = queue.requests.is_empty();
        if is_empty {
            guard.remove(&resource);
        }
        txn.remove_held(resource);
        tracing::trace!(txn_id = txn.id(), %resource, "released");
        drop(guard);
        cvar.notify_all();
        Ok(true)
    }

    fn is_locked(&self, resource: LockDataId) -> bool {
        self.table
            .lock()
            .get(&resource)
            .map(|q| !q.requests.is_empty())
            .unwrap_or(false)
    }

    fn lock_mode_held_by(&self, resource: LockDataId, txn_id: TransactionId) -> Option<LockMode> {
        self.table.lock().get(&resource).and_then(|q| q.find_own(txn_id)).map(|r| r.mode)
    }
}
