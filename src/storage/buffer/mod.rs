pub mod error;
pub mod instance;
pub mod parallel;
pub mod replacer;

use std::sync::Arc;

use crate::common::types::PageId;
use crate::storage::page::Page;

pub use error::BufferPoolError;
pub use instance::BufferPoolInstance;
pub use parallel::ParallelBufferPool;
pub use replacer::LruReplacer;

/// The buffer pool surface consumed by indexes and executors. Both the
/// single instance and the sharded pool implement it.
pub trait BufferPool: Send + Sync {
    /// Create a brand new pinned page.
    fn new_page(&self) -> Result<(Arc<Page>, PageId), BufferPoolError>;

    /// Fetch an existing page, pinned.
    fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>, BufferPoolError>;

    /// Drop one pin, optionally marking the page dirty.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;

    /// Write the page back to disk if dirty.
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Remove an unpinned page from the pool.
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;

    /// Write every dirty page back to disk.
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;

    /// Total number of frames.
    fn pool_size(&self) -> usize;
}

impl BufferPool for BufferPoolInstance {
    fn new_page(&self) -> Result<(Arc<Page>, PageId), BufferPoolError> {
        BufferPoolInstance::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>, BufferPoolError> {
        BufferPoolInstance::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolInstance::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::delete_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        BufferPoolInstance::pool_size(self)
    }
}

impl BufferPool for ParallelBufferPool {
    fn new_page(&self) -> Result<(Arc<Page>, PageId), BufferPoolError> {
        ParallelBufferPool::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>, BufferPoolError> {
        ParallelBufferPool::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        ParallelBufferPool::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPool::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        ParallelBufferPool::delete_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        ParallelBufferPool::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPool::pool_size(self)
    }
}
