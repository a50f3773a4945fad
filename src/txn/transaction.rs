//! A single transaction's identity, lifecycle state, and held-lock bookkeeping.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::common::{Rid, TxnId};

/// Lifecycle state of a transaction under two-phase locking.
///
/// ```text
///            ___________________________
///           |                           v
/// GROWING -> SHRINKING -> COMMITTED   ABORTED
///    |___________|_________________________^
/// ```
///
/// `COMMITTED` and `ABORTED` are terminal: once reached, the state never
/// changes again (see the "monotone aborts" invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An in-memory record of one transaction: its id, its lifecycle state, and
/// the RIDs it currently holds under shared and under exclusive locks.
///
/// The held-lock sets are guarded by an internal latch rather than left
/// unsynchronized, because they are mutated both by the owning thread (on a
/// grant) and by other threads performing a wound. Callers outside the lock
/// manager should still treat all mutation of these sets as the lock
/// manager's job: [`Transaction`] only exposes the accessors the lock manager
/// and transaction manager need, not raw set access.
pub struct Transaction {
    txn_id: TxnId,
    state: Mutex<TransactionState>,
    shared_set: Mutex<HashSet<Rid>>,
    exclusive_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    /// Creates a new transaction in the `Growing` state with no held locks.
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: Mutex::new(TransactionState::Growing),
            shared_set: Mutex::new(HashSet::new()),
            exclusive_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Sets the transaction's state directly. Callers are responsible for
    /// only driving legal transitions (see the state diagram above); this
    /// method does not itself validate the transition.
    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn holds_shared(&self, rid: Rid) -> bool {
        self.shared_set.lock().contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_set.lock().contains(&rid)
    }

    /// A snapshot of the RIDs currently held in shared mode.
    pub fn shared_set(&self) -> HashSet<Rid> {
        self.shared_set.lock().clone()
    }

    /// A snapshot of the RIDs currently held in exclusive mode.
    pub fn exclusive_set(&self) -> HashSet<Rid> {
        self.exclusive_set.lock().clone()
    }

    pub(crate) fn insert_shared(&self, rid: Rid) {
        self.shared_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) {
        self.shared_set.lock().remove(&rid);
    }

    pub(crate) fn insert_exclusive(&self, rid: Rid) {
        self.exclusive_set.lock().insert(rid);
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) {
        self.exclusive_set.lock().remove(&rid);
    }

    /// Removes `rid` from both held-lock sets, regardless of which mode it
    /// was held under. Used when scrubbing a wounded or self-aborted
    /// transaction's bookkeeping.
    pub(crate) fn clear_rid(&self, rid: Rid) {
        self.shared_set.lock().remove(&rid);
        self.exclusive_set.lock().remove(&rid);
    }
}
