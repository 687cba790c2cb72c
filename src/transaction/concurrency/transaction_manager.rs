use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Process-wide map of live transactions. The lock manager looks
/// transactions up by id when wounding; the registry is injected into it
/// explicitly rather than hiding behind a singleton.
pub struct TransactionRegistry {
    txns: RwLock<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            txns: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, txn: Arc<Transaction>) {
        self.txns.write().insert(txn.id(), txn);
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txns.read().get(&txn_id).cloned()
    }

    pub fn unregister(&self, txn_id: TxnId) {
        self.txns.write().remove(&txn_id);
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates and finalizes transactions. Ids are handed out monotonically
/// starting at zero, so the id order is the age order wound-wait relies
/// on.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(registry: Arc<TransactionRegistry>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            registry,
            lock_manager,
        }
    }

    /// Begin a new transaction and register it for wound-wait lookups.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.registry.register(txn.clone());
        txn
    }

    /// Commit: release every held row lock and retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.release_all_locks(txn);
        self.registry.unregister(txn.id());
    }

    /// Abort: release every held row lock and retire the transaction.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.registry.unregister(txn.id());
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let held: Vec<Rid> = {
            let shared = txn.shared_lock_set();
            let exclusive = txn.exclusive_lock_set();
            shared.iter().chain(exclusive.iter()).copied().collect()
        };
        for rid in held {
            let _ = self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_manager() -> (Arc<TransactionRegistry>, TransactionManager) {
        let registry = Arc::new(TransactionRegistry::new());
        let lock_manager = Arc::new(LockManager::new(registry.clone()));
        let manager = TransactionManager::new(registry.clone(), lock_manager);
        (registry, manager)
    }

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let (registry, manager) = create_manager();

        let txn0 = manager.begin(IsolationLevel::RepeatableRead);
        let txn1 = manager.begin(IsolationLevel::ReadCommitted);
        assert_eq!(0, txn0.id());
        assert_eq!(1, txn1.id());
        assert!(registry.get(0).is_some());
        assert!(registry.get(1).is_some());
    }

    #[test]
    fn test_commit_retires_transaction() {
        let (registry, manager) = create_manager();

        let txn = manager.begin(IsolationLevel::RepeatableRead);
        manager.commit(&txn);
        assert_eq!(TransactionState::Committed, txn.state());
        assert!(registry.get(txn.id()).is_none());
    }

    #[test]
    fn test_abort_retires_transaction() {
        let (registry, manager) = create_manager();

        let txn = manager.begin(IsolationLevel::RepeatableRead);
        manager.abort(&txn);
        assert_eq!(TransactionState::Aborted, txn.state());
        assert!(registry.get(txn.id()).is_none());
    }
}
