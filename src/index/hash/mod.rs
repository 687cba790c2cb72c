mod error;
mod table;

pub use error::HashIndexError;
pub use table::{ExtendibleHashIndex, IndexStats};
