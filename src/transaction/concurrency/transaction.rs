use std::collections::HashSet;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under two-phase locking: a transaction acquires
/// locks while `Growing`; its first release moves it to `Shrinking`, after
/// which acquiring is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
}

/// Raised by the lock manager to unwind an aborted transaction. The
/// transaction's state is moved to `Aborted` before this error becomes
/// visible to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbortError {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}

/// An active database transaction: its id, isolation level, two-phase
/// locking state and the row locks it currently holds. Ids increase
/// monotonically, so a lower id means an older transaction.
///
/// The lock manager mutates state and lock sets from other threads when
/// wounding, hence the interior mutability.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    pub fn shared_lock_set(&self) -> MutexGuard<'_, HashSet<Rid>> {
        self.shared_lock_set.lock()
    }

    pub fn exclusive_lock_set(&self) -> MutexGuard<'_, HashSet<Rid>> {
        self.exclusive_lock_set.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted);
        assert_eq!(1, txn.id());
        assert_eq!(TransactionState::Growing, txn.state());
        assert_eq!(IsolationLevel::ReadCommitted, txn.isolation_level());
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(TransactionState::Shrinking, txn.state());
        txn.set_state(TransactionState::Aborted);
        assert_eq!(TransactionState::Aborted, txn.state());
    }

    #[test]
    fn test_lock_set_tracking() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        txn.shared_lock_set().insert(rid);
        assert!(txn.is_shared_locked(&rid));
        assert!(!txn.is_exclusive_locked(&rid));

        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().insert(rid);
        assert!(txn.is_exclusive_locked(&rid));
    }
}
