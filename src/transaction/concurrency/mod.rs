mod lock_manager;
mod transaction;
mod transaction_manager;

pub use lock_manager::LockManager;
pub use transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};
pub use transaction_manager::{TransactionManager, TransactionRegistry};
