//! Per-resource lock request queues, the three acquire paths (shared,
//! exclusive, upgrade), release, and the wound-wait deadlock-prevention scan.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::{Rid, TxnId, INVALID_TXN_ID};
use crate::txn::transaction::{Transaction, TransactionState};
use crate::txn::transaction_manager::TransactionTable;

/// The mode a [`LockRequest`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One transaction's request against one resource.
#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-RID queue state: the ordered request list, the condition variable
/// waiters suspend on, and which transaction (if any) is mid-upgrade.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    /// `INVALID_TXN_ID` unless a transaction is upgrading on this resource.
    upgrading: TxnId,
    /// Kept behind an `Arc` so it can be cloned out of the table guard before
    /// waiting: the condvar must not itself be borrowed from the guard it
    /// will be used to unlock and relock.
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: INVALID_TXN_ID,
            cv: Arc::new(Condvar::new()),
        }
    }
}

type LockTable = HashMap<Rid, LockRequestQueue>;

/// Process-wide registry mapping each resource id to its request queue, plus
/// the acquire/release algorithms and the wound-wait policy.
///
/// All state is guarded by a single latch (`table`). A per-queue condition
/// variable is associated with that same latch: waiting releases `table` and
/// reacquires it on wake, so at most one thread is ever inspecting or
/// mutating the lock table at a time.
pub struct LockManager {
    table: Mutex<LockTable>,
    txn_table: TransactionTable,
}

impl LockManager {
    /// Creates an empty lock manager. `txn_table` is the registry the
    /// manager consults to look up and wound the owners of conflicting
    /// requests; it is normally shared with a [`crate::txn::TransactionManager`]
    /// constructed over the same table.
    pub fn new(txn_table: TransactionTable) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            txn_table,
        }
    }

    /// Acquires a shared lock on `rid` for `txn`, blocking until granted,
    /// wounded, or self-aborted.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut guard = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
            txn.set_state(TransactionState::Aborted);
            Self::reset_lock_request(queue, txn, rid);
            return false;
        }
        if txn.holds_shared(rid) || txn.holds_exclusive(rid) {
            return true;
        }

        let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
        Self::upsert_request(queue, txn.id(), LockMode::Shared);

        let wounded = self.wound_younger(queue, rid, txn.id(), true);
        if wounded {
            queue.cv.notify_all();
        }
        let cv = queue.cv.clone();

        loop {
            {
                let queue = guard.get(&rid).expect("queue exists for a rid we just inserted into");
                if txn.state() == TransactionState::Aborted || Self::valid_shared(queue, txn.id()) {
                    break;
                }
            }
            cv.wait(&mut guard);
        }

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        Self::mark_granted(&mut guard, rid, txn.id());
        txn.insert_shared(rid);
        debug!("txn {} granted shared lock on rid {}", txn.id(), rid);
        true
    }

    /// Acquires an exclusive lock on `rid` for `txn`, blocking until
    /// granted, wounded, or self-aborted.
    ///
    /// If `txn` already holds `rid` in shared mode, this is deliberately
    /// *not* treated as an upgrade: it proceeds as a brand-new exclusive
    /// request, which will wound itself out or wait forever behind its own
    /// shared entry. Callers that hold a shared lock and want exclusive
    /// access must call [`LockManager::lock_upgrade`] instead.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut guard = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
            txn.set_state(TransactionState::Aborted);
            Self::reset_lock_request(queue, txn, rid);
            return false;
        }
        if txn.holds_exclusive(rid) {
            return true;
        }

        let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
        Self::upsert_request(queue, txn.id(), LockMode::Exclusive);

        let wounded = self.wound_younger(queue, rid, txn.id(), false);
        if wounded {
            queue.cv.notify_all();
        }
        let cv = queue.cv.clone();

        loop {
            {
                let queue = guard.get(&rid).expect("queue exists for a rid we just inserted into");
                if txn.state() == TransactionState::Aborted || Self::valid_exclusive(queue, txn.id()) {
                    break;
                }
            }
            cv.wait(&mut guard);
        }

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        Self::mark_granted(&mut guard, rid, txn.id());
        txn.insert_exclusive(rid);
        debug!("txn {} granted exclusive lock on rid {}", txn.id(), rid);
        true
    }

    /// Promotes `txn`'s shared lock on `rid` to exclusive.
    ///
    /// Requires `txn` to already hold `rid` shared; returns `false` with no
    /// state change if it does not (an illegal upgrade, not a failure worth
    /// aborting over). At most one transaction may be upgrading on a given
    /// resource at a time — a second concurrent upgrader self-aborts.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut guard = self.table.lock();

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() == TransactionState::Shrinking {
            let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
            txn.set_state(TransactionState::Aborted);
            Self::reset_lock_request(queue, txn, rid);
            return false;
        }
        if txn.holds_exclusive(rid) {
            return true;
        }
        if !txn.holds_shared(rid) {
            return false;
        }

        let queue = guard.entry(rid).or_insert_with(LockRequestQueue::new);
        if queue.upgrading != INVALID_TXN_ID {
            txn.set_state(TransactionState::Aborted);
            Self::reset_lock_request(queue, txn, rid);
            return false;
        }

        queue.upgrading = txn.id();
        // Replace the caller's own SHARED entry with a not-granted EXCLUSIVE
        // entry, rather than inserting a second one: `upsert_request`
        // matches on txn_id alone, so it finds and overwrites it in place.
        Self::upsert_request(queue, txn.id(), LockMode::Exclusive);

        let wounded = self.wound_younger(queue, rid, txn.id(), false);
        if wounded {
            queue.cv.notify_all();
        }
        let cv = queue.cv.clone();

        loop {
            {
                let queue = guard.get(&rid).expect("queue exists for a rid we just inserted into");
                if txn.state() == TransactionState::Aborted || Self::valid_exclusive(queue, txn.id()) {
                    break;
                }
            }
            cv.wait(&mut guard);
        }

        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = guard.get_mut(&rid) {
                queue.upgrading = INVALID_TXN_ID;
            }
            return false;
        }

        Self::mark_granted(&mut guard, rid, txn.id());
        txn.remove_shared(rid);
        txn.insert_exclusive(rid);
        if let Some(queue) = guard.get_mut(&rid) {
            queue.upgrading = INVALID_TXN_ID;
        }
        debug!("txn {} upgraded to exclusive lock on rid {}", txn.id(), rid);
        true
    }

    /// Releases `txn`'s lock on `rid`, if it holds one.
    ///
    /// This does not itself move `txn` to `Shrinking`; see `DESIGN.md` for
    /// why that transition is left to the transaction manager rather than
    /// triggered implicitly by the first unlock.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut guard = self.table.lock();
        let Some(queue) = guard.get_mut(&rid) else {
            return false;
        };
        let had_entry = queue.requests.iter().any(|r| r.txn_id == txn.id());
        if !had_entry {
            return false;
        }
        queue.requests.retain(|r| r.txn_id != txn.id());
        txn.clear_rid(rid);
        queue.cv.notify_all();
        debug!("txn {} released lock on rid {}", txn.id(), rid);
        true
    }

    /// Snapshot of `(txn_id, mode, granted)` for every entry in `rid`'s
    /// queue, in queue order. For diagnostics and tests; not part of the
    /// locking algorithm itself.
    pub fn queue_snapshot(&self, rid: Rid) -> Vec<(TxnId, LockMode, bool)> {
        let guard = self.table.lock();
        guard
            .get(&rid)
            .map(|q| q.requests.iter().map(|r| (r.txn_id, r.mode, r.granted)).collect())
            .unwrap_or_default()
    }

    /// Removes `txn`'s queue entry (if any) and scrubs `rid` from both of
    /// its held-lock sets. Used when a transaction is found ineligible to
    /// acquire (two-phase violation, upgrade conflict) and is being
    /// self-aborted.
    ///
    /// Broadcasts on the queue's condvar: the removed entry may have been
    /// the one blocking another waiter's grant predicate (e.g. a granted
    /// SHARED entry sitting ahead of an EXCLUSIVE waiter), and that waiter
    /// has no other way to learn the queue changed.
    fn reset_lock_request(queue: &mut LockRequestQueue, txn: &Transaction, rid: Rid) {
        txn.clear_rid(rid);
        queue.requests.retain(|r| r.txn_id != txn.id());
        queue.cv.notify_all();
    }

    /// Inserts a new request for `txn_id`, or — if one already exists,
    /// regardless of its current mode — overwrites it in place. Matches the
    /// "at most one entry per txn_id" queue invariant.
    fn upsert_request(queue: &mut LockRequestQueue, txn_id: TxnId, mode: LockMode) {
        if let Some(existing) = queue.requests.iter_mut().find(|r| r.txn_id == txn_id) {
            existing.mode = mode;
            existing.granted = false;
        } else {
            queue.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }
    }

    /// Scans `queue` and wounds every entry younger than `txn_id` (i.e. with
    /// a numerically greater id): the victim transaction is moved to
    /// `Aborted`, `rid` is scrubbed from whichever of its sets matches the
    /// wounded entry's mode, and the entry is removed from the queue.
    ///
    /// When `only_exclusive` is set (the [`LockManager::lock_shared`] path),
    /// only EXCLUSIVE entries are wounded — a younger SHARED holder is not a
    /// conflict for an incoming SHARED request. Returns whether any wound
    /// occurred, so the caller knows whether a broadcast is needed.
    fn wound_younger(&self, queue: &mut LockRequestQueue, rid: Rid, txn_id: TxnId, only_exclusive: bool) -> bool {
        let mut wounded = false;
        queue.requests.retain(|req| {
            let is_younger = req.txn_id > txn_id;
            let conflicts = is_younger && (!only_exclusive || req.mode == LockMode::Exclusive);
            if conflicts {
                match self.txn_table.get(req.txn_id) {
                    Some(victim) => {
                        match req.mode {
                            LockMode::Shared => victim.remove_shared(rid),
                            LockMode::Exclusive => victim.remove_exclusive(rid),
                        }
                        victim.set_state(TransactionState::Aborted);
                        info!("wounded txn {} on rid {} (older requester: txn {})", req.txn_id, rid, txn_id);
                    }
                    None => warn!(
                        "wound target txn {} missing from transaction table (rid {})",
                        req.txn_id, rid
                    ),
                }
                wounded = true;
            }
            !conflicts
        });
        wounded
    }

    /// Flags `txn_id`'s entry on `rid` as granted. Purely bookkeeping: the
    /// grant predicates never consult `granted`, only queue position.
    fn mark_granted(table: &mut LockTable, rid: Rid, txn_id: TxnId) {
        if let Some(queue) = table.get_mut(&rid) {
            if let Some(req) = queue.requests.iter_mut().find(|r| r.txn_id == txn_id) {
                req.granted = true;
            }
        }
    }

    /// No EXCLUSIVE request precedes `txn_id`'s SHARED request in `queue`.
    fn valid_shared(queue: &LockRequestQueue, txn_id: TxnId) -> bool {
        for req in &queue.requests {
            if req.txn_id == txn_id && req.mode == LockMode::Shared {
                return true;
            }
            if req.mode == LockMode::Exclusive {
                return false;
            }
        }
        true
    }

    /// `txn_id`'s EXCLUSIVE request is at the head of `queue`.
    fn valid_exclusive(queue: &LockRequestQueue, txn_id: TxnId) -> bool {
        match queue.requests.front() {
            Some(front) => front.txn_id == txn_id && front.mode == LockMode::Exclusive,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::transaction_manager::TransactionTable;

    fn new_manager() -> (LockManager, TransactionTable) {
        let table = TransactionTable::new();
        (LockManager::new(table.clone()), table)
    }

    fn new_txn(table: &TransactionTable, id: TxnId) -> Arc<Transaction> {
        let txn = Arc::new(Transaction::new(id));
        table.insert(txn.clone());
        txn
    }

    #[test]
    fn basic_shared_sharing() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);
        let t2 = new_txn(&table, 2);

        assert!(lm.lock_shared(&t1, 0));
        assert!(lm.lock_shared(&t2, 0));
        assert!(t1.holds_shared(0));
        assert!(t2.holds_shared(0));
    }

    #[test]
    fn repeated_shared_lock_is_idempotent() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);

        assert!(lm.lock_shared(&t1, 0));
        assert!(lm.lock_shared(&t1, 0));
        assert_eq!(lm.queue_snapshot(0).len(), 1);
    }

    #[test]
    fn repeated_exclusive_lock_is_idempotent() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);

        assert!(lm.lock_exclusive(&t1, 0));
        assert!(lm.lock_exclusive(&t1, 0));
        assert_eq!(lm.queue_snapshot(0).len(), 1);
    }

    #[test]
    fn wound_younger_exclusive_holder() {
        let (lm, table) = new_manager();
        let t2 = new_txn(&table, 2);
        let t1 = new_txn(&table, 1);

        assert!(lm.lock_exclusive(&t2, 0));
        assert!(lm.lock_exclusive(&t1, 0));

        assert_eq!(t2.state(), TransactionState::Aborted);
        assert!(!t2.holds_exclusive(0));
        assert!(t1.holds_exclusive(0));
    }

    #[test]
    fn upgrade_happy_path() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);

        assert!(lm.lock_shared(&t1, 0));
        assert!(lm.lock_upgrade(&t1, 0));
        assert!(!t1.holds_shared(0));
        assert!(t1.holds_exclusive(0));
    }

    #[test]
    fn illegal_upgrade_without_shared_lock_is_benign() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);

        assert!(!lm.lock_upgrade(&t1, 0));
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn upgrade_collision_aborts_the_second_upgrader() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);
        let t2 = new_txn(&table, 2);

        assert!(lm.lock_shared(&t1, 0));
        assert!(lm.lock_shared(&t2, 0));

        // t2 becomes the exclusive waiter behind t1; t1 then tries to
        // upgrade too and finds `upgrading` already claimed.
        {
            let mut guard = lm.table.lock();
            let queue = guard.get_mut(&0).unwrap();
            queue.upgrading = t2.id();
        }
        assert!(!lm.lock_upgrade(&t1, 0));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn unlock_removes_entry_and_allows_relock_at_tail() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);
        let t2 = new_txn(&table, 2);

        assert!(lm.lock_exclusive(&t1, 0));
        assert!(lm.unlock(&t1, 0));
        assert!(!t1.holds_exclusive(0));
        assert!(!lm.unlock(&t1, 0));

        assert!(lm.lock_exclusive(&t2, 0));
        assert_eq!(lm.queue_snapshot(0), vec![(2, LockMode::Exclusive, true)]);
    }

    #[test]
    fn two_phase_violation_self_aborts() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);
        t1.set_state(TransactionState::Shrinking);

        assert!(!lm.lock_shared(&t1, 0));
        assert_eq!(t1.state(), TransactionState::Aborted);
        assert!(lm.queue_snapshot(0).is_empty());
    }

    #[test]
    fn already_aborted_caller_is_a_no_op() {
        let (lm, table) = new_manager();
        let t1 = new_txn(&table, 1);
        t1.set_state(TransactionState::Aborted);

        assert!(!lm.lock_shared(&t1, 0));
        assert!(lm.queue_snapshot(0).is_empty());
    }
}
