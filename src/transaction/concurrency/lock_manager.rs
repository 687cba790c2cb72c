use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    wounded: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
            wounded: false,
        }
    }

    fn matches(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.txn_id == txn_id && self.mode == mode
    }
}

#[derive(Default)]
struct QueueInner {
    /// Requests currently holding the lock.
    grant_queue: VecDeque<LockRequest>,
    /// Blocked requests, in FIFO order.
    wait_queue: VecDeque<LockRequest>,
    /// The transaction upgrading S to X on this row, if any.
    upgrading: Option<TxnId>,
}

impl QueueInner {
    /// A request at the head of the wait queue may proceed when the grant
    /// queue is empty, or when it asks for S and the last granted request
    /// is S too.
    fn compatible(&self, mode: LockMode) -> bool {
        match self.grant_queue.back() {
            None => true,
            Some(last) => {
                mode == LockMode::Shared && last.mode == LockMode::Shared && last.granted
            }
        }
    }

    fn head_of_wait_queue(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.wait_queue
            .front()
            .map_or(false, |request| request.matches(txn_id, mode))
    }
}

struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    /// Wakes blocked requests on this row.
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cv: Condvar::new(),
        }
    }
}

/// LockManager serializes transactions asking for row locks.
///
/// Each row gets a request queue: a grant queue of current holders and a
/// FIFO wait queue gated by the compatibility rule. Deadlocks are
/// prevented with wound-wait: an older waiter aborts every younger
/// request in its way, and the wounded transaction observes the abort the
/// next time it wakes. Queues are created on first use and live for the
/// life of the process.
pub struct LockManager {
    registry: Arc<TransactionRegistry>,
    latch: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl LockManager {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self {
            registry,
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on the row, blocking until granted.
    pub fn lock_shared(
        &self,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        self.sanity_check(txn, LockMode::Shared)?;
        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            // the lock is re-entering
            return Ok(true);
        }
        let queue = self.request_queue(rid);
        self.wait_in_queue(&queue, txn, LockMode::Shared)?;
        txn.shared_lock_set().insert(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on the row, blocking until granted.
    pub fn lock_exclusive(
        &self,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        self.sanity_check(txn, LockMode::Exclusive)?;
        if txn.is_exclusive_locked(&rid) {
            // the lock is re-entering
            return Ok(true);
        }
        let queue = self.request_queue(rid);
        self.wait_in_queue(&queue, txn, LockMode::Exclusive)?;
        txn.exclusive_lock_set().insert(rid);
        Ok(true)
    }

    /// Promote a held shared lock to exclusive in place. Only one upgrade
    /// may be in flight per row; a second one aborts with
    /// `UpgradeConflict`.
    pub fn lock_upgrade(
        &self,
        txn: &Transaction,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        self.sanity_check(txn, LockMode::Exclusive)?;
        if txn.is_exclusive_locked(&rid) {
            // the lock is re-entering
            return Ok(true);
        }

        let queue = self.request_queue(rid);
        {
            let mut inner = queue.inner.lock();
            if inner.upgrading.is_some() {
                drop(inner);
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionAbortError::new(
                    txn.id(),
                    AbortReason::UpgradeConflict,
                ));
            }
            inner.upgrading = Some(txn.id());

            // drop the shared grant before re-entering the wait queue
            match inner
                .grant_queue
                .iter()
                .position(|request| request.txn_id == txn.id())
            {
                Some(pos) => {
                    let request = inner.grant_queue.remove(pos).unwrap();
                    debug_assert!(request.granted);
                    debug_assert_eq!(LockMode::Shared, request.mode);
                }
                None => {
                    inner.upgrading = None;
                    drop(inner);
                    warn!(
                        "Upgrade without a held shared lock, txn id = {}, rid = {}.",
                        txn.id(),
                        rid
                    );
                    return Ok(false);
                }
            }
        }

        let result = self.wait_in_queue(&queue, txn, LockMode::Exclusive);
        {
            let mut inner = queue.inner.lock();
            inner.upgrading = None;
        }
        result?;

        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().insert(rid);
        Ok(true)
    }

    /// Release the row lock held by the transaction. Returns false when
    /// the transaction does not hold one.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let queue = self.request_queue(rid);
        let mut was_shared = false;
        let found = {
            let mut inner = queue.inner.lock();
            match inner
                .grant_queue
                .iter()
                .position(|request| request.txn_id == txn.id())
            {
                Some(pos) => {
                    let request = inner.grant_queue.remove(pos).unwrap();
                    debug_assert!(request.granted);
                    was_shared = request.mode == LockMode::Shared;
                    if was_shared {
                        txn.shared_lock_set().remove(&rid);
                    } else {
                        txn.exclusive_lock_set().remove(&rid);
                    }
                    if inner.grant_queue.is_empty() {
                        // let the waiters re-check compatibility
                        queue.cv.notify_all();
                    }
                    true
                }
                None => false,
            }
        };

        if !found {
            warn!(
                "Didn't find the request specified in unlock, txn id = {}, rid = {}.",
                txn.id(),
                rid
            );
            return false;
        }

        /* First release under two-phase locking ends the growing phase,
         * except that READ_COMMITTED may drop shared locks freely. */
        if txn.state() == TransactionState::Growing
            && !(was_shared && txn.isolation_level() == IsolationLevel::ReadCommitted)
        {
            txn.set_state(TransactionState::Shrinking);
        }
        true
    }

    fn request_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.latch.lock();
        table
            .entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn sanity_check(
        &self,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionAbortError::new(txn.id(), AbortReason::Deadlock));
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockOnShrinking,
            ));
        }
        if mode == LockMode::Shared && txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockSharedOnReadUncommitted,
            ));
        }
        Ok(())
    }

    /// Abort every younger, not yet wounded request ahead of `txn_id` in
    /// the queue. Returns how many requests were wounded.
    fn wound_requests(&self, queue: &mut VecDeque<LockRequest>, txn_id: TxnId) -> usize {
        let mut wound_count = 0;
        for request in queue.iter_mut() {
            if request.txn_id == txn_id {
                // a request never wounds the requests waiting behind it
                break;
            }
            if !request.wounded && request.txn_id > txn_id {
                if let Some(young_txn) = self.registry.get(request.txn_id) {
                    request.wounded = true;
                    young_txn.set_state(TransactionState::Aborted);
                    wound_count += 1;
                }
            }
        }
        wound_count
    }

    /// Enqueue a request and block until it reaches the head of the wait
    /// queue and is compatible with the grant queue. While waiting, the
    /// request wounds every younger transaction in its way; if it is
    /// wounded itself, it unregisters and aborts.
    fn wait_in_queue(
        &self,
        queue: &LockRequestQueue,
        txn: &Transaction,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut inner = queue.inner.lock();
        inner.wait_queue.push_back(LockRequest::new(txn_id, mode));

        while !(inner.head_of_wait_queue(txn_id, mode) && inner.compatible(mode)) {
            let wounded_waiting = {
                let QueueInner {
                    grant_queue,
                    wait_queue,
                    ..
                } = &mut *inner;
                self.wound_requests(grant_queue, txn_id);
                // only woundings in the wait queue call for a broadcast
                self.wound_requests(wait_queue, txn_id)
            };
            if wounded_waiting > 0 {
                queue.cv.notify_all();
            }

            /* Even wounded transactions hold their locks until they
             * observe the abort, so we still have to wait. */
            queue.cv.wait(&mut inner);

            if txn.state() == TransactionState::Aborted {
                // this request was wounded during the wait
                inner
                    .wait_queue
                    .retain(|request| !request.matches(txn_id, mode));
                queue.cv.notify_all();
                drop(inner);
                return Err(TransactionAbortError::new(txn_id, AbortReason::Deadlock));
            }
        }

        let mut request = inner.wait_queue.pop_front().unwrap();
        debug_assert!(request.matches(txn_id, mode));
        request.granted = true;
        inner.grant_queue.push_back(request);
        if !inner.wait_queue.is_empty() {
            // a compatible successor may be grantable now
            queue.cv.notify_all();
        }
        Ok(())
    }
}
