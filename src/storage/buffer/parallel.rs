use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::types::PageId;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;
use crate::storage::page::Page;

/// A buffer pool sharded over several independent instances.
///
/// Page ids fan out by `page_id mod num_instances`; every instance only
/// allocates ids congruent to its own index, so dispatch and allocation
/// agree.
pub struct ParallelBufferPool {
    num_instances: u32,
    instance_pool_size: usize,
    instances: Vec<BufferPoolInstance>,
    /// Where the next new_page starts probing; advanced once per call.
    start_index: AtomicUsize,
}

impl ParallelBufferPool {
    pub fn new(num_instances: u32, pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolInstance::with_instance(pool_size, num_instances, i, disk_manager.clone())
            })
            .collect();

        Self {
            num_instances,
            instance_pool_size: pool_size,
            instances,
            start_index: AtomicUsize::new(0),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.num_instances as usize * self.instance_pool_size
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.num_instances as usize]
    }

    /// Ask each instance in turn for a fresh page, starting after where
    /// the previous call started so allocation spreads round-robin.
    pub fn new_page(&self) -> Result<(Arc<Page>, PageId), BufferPoolError> {
        let mut start = self.start_index.load(Ordering::Relaxed);
        loop {
            match self.start_index.compare_exchange_weak(
                start,
                (start + 1) % self.num_instances as usize,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => start = current,
            }
        }

        for i in 0..self.num_instances as usize {
            let index = (start + i) % self.num_instances as usize;
            match self.instances[index].new_page() {
                Ok(page) => return Ok(page),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}
