pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, Transaction, TransactionAbortError,
    TransactionManager, TransactionRegistry, TransactionState,
};
