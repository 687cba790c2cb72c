pub mod spinlock;
pub mod types;
