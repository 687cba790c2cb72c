use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::RwLock;

use crate::common::spinlock::SpinLock;
use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::Page;

/// One buffer pool instance: a fixed array of frames caching disk pages.
///
/// Rather than a single global mutex, the instance uses a fine-grained
/// locking discipline: a shared mutex over the page table (so fetch hits
/// do not serialize), a spin latch over the free list, the replacer's own
/// lock, and per-frame meta-locks and rw-latches. Locks are acquired in
/// the order table -> page latch -> page meta -> replacer -> free list.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    /// Counter for page ids to hand out; every id mods back to
    /// `instance_index`.
    next_page_id: AtomicI32,
    frames: Vec<Arc<Page>>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    replacer: LruReplacer,
    free_list: SpinLock<VecDeque<FrameId>>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolInstance {
    /// Create a stand-alone instance.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_instance(pool_size, 1, 0, disk_manager)
    }

    /// Create an instance that is one shard of a parallel buffer pool.
    pub fn with_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index must fall inside the pool"
        );

        let frames = (0..pool_size).map(|_| Arc::new(Page::new())).collect();
        let free_list = (0..pool_size).collect::<VecDeque<FrameId>>();

        Self {
            pool_size,
            num_instances,
            instance_index,
            next_page_id: AtomicI32::new(instance_index as i32),
            frames,
            page_table: RwLock::new(HashMap::new()),
            replacer: LruReplacer::new(pool_size),
            free_list: SpinLock::new(free_list),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Create a brand new page, pinned. Fails with `PoolExhausted` when
    /// every frame is pinned.
    pub fn new_page(&self) -> Result<(Arc<Page>, PageId), BufferPoolError> {
        if let Some((frame_id, page_id)) = self.free_list_get_frame(None)? {
            return Ok((self.frames[frame_id].clone(), page_id));
        }
        if let Some((frame_id, page_id)) = self.replacer_get_frame(None)? {
            return Ok((self.frames[frame_id].clone(), page_id));
        }
        Err(BufferPoolError::PoolExhausted)
    }

    /// Fetch the requested page, pinned, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot fetch page id {}",
                page_id
            )));
        }

        let mut hit = None;
        {
            let table = self.page_table.read();
            if let Some(&frame_id) = table.get(&page_id) {
                let page = &self.frames[frame_id];
                let mut meta = page.meta();
                debug_assert_eq!(page_id, meta.page_id);
                let old_pin = meta.pin_count;
                meta.pin_count += 1;
                hit = Some((frame_id, old_pin));
            }
        }

        /* The replacer.pin() lagging behind the pin count increment may
         * let the frame be selected by the replacement process, but the
         * victim path rechecks the pin count before committing. */
        if let Some((frame_id, old_pin)) = hit {
            if old_pin == 0 {
                self.replacer.pin(frame_id);
            }
            return Ok(self.frames[frame_id].clone());
        }

        if let Some((frame_id, _)) = self.free_list_get_frame(Some(page_id))? {
            return Ok(self.frames[frame_id].clone());
        }
        if let Some((frame_id, _)) = self.replacer_get_frame(Some(page_id))? {
            return Ok(self.frames[frame_id].clone());
        }
        Err(BufferPoolError::PoolExhausted)
    }

    /// Drop one pin on the page, optionally marking it dirty.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let frame_id = {
            let table = self.page_table.read();
            match table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => {
                    error!("Unpin a non-existing page! page id = {}.", page_id);
                    return Err(BufferPoolError::PageNotFound(page_id));
                }
            }
        };

        // Unpin is not as critical as pin, so it can run outside the
        // scope of the table lock.
        let page = &self.frames[frame_id];
        let old_pin = {
            let mut meta = page.meta();
            if meta.pin_count <= 0 {
                drop(meta);
                error!(
                    "Trying to unpin a page with pin_count <= 0, page id = {}.",
                    page_id
                );
                return Err(BufferPoolError::PageNotPinned(page_id));
            }
            if is_dirty {
                meta.is_dirty = true;
                meta.just_dirtied = true;
            }
            let old_pin = meta.pin_count;
            meta.pin_count -= 1;
            old_pin
        };

        if old_pin == 1 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Write the page to disk if it is dirty. Returns only after the disk
    /// write has completed.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let (frame_id, old_pin) = {
            let table = self.page_table.read();
            let frame_id = match table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => {
                    error!("Try to flush a non-existing page! page id = {}.", page_id);
                    return Err(BufferPoolError::PageNotFound(page_id));
                }
            };
            let page = &self.frames[frame_id];
            let mut meta = page.meta();
            if !meta.is_dirty {
                return Ok(());
            }
            let old_pin = meta.pin_count;
            meta.pin_count += 1;
            meta.just_dirtied = false;
            (frame_id, old_pin)
        };

        if old_pin == 0 {
            self.replacer.pin(frame_id);
        }

        /* Someone might flush the page concurrently, but flushing it once
         * more is merely redundant, never wrong. */
        let page = &self.frames[frame_id];
        let data = page.data();
        let result = self.disk_manager.write_page(page_id, &data[..]);
        drop(data);

        let new_pin = {
            let mut meta = page.meta();
            meta.pin_count -= 1;
            // a write that landed during the flush keeps the page dirty
            if result.is_ok() && !meta.just_dirtied {
                meta.is_dirty = false;
            }
            meta.pin_count
        };
        if new_pin == 0 {
            self.replacer.unpin(frame_id);
        }
        result.map_err(Into::into)
    }

    /// Flush every dirty page in the pool, best-effort.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        /* Holding the shared table lock keeps every mapped frame from
         * being evicted, so no pinning is needed here. */
        let table = self.page_table.read();
        for (&page_id, &frame_id) in table.iter() {
            let page = &self.frames[frame_id];
            {
                let mut meta = page.meta();
                debug_assert_eq!(page_id, meta.page_id);
                if !meta.is_dirty {
                    continue;
                }
                meta.just_dirtied = false;
            }

            let data = page.data();
            self.disk_manager.write_page(page_id, &data[..])?;
            drop(data);

            let mut meta = page.meta();
            if !meta.just_dirtied {
                meta.is_dirty = false;
            }
        }
        Ok(())
    }

    /// Drop the page from the pool and free its frame. Deleting a page
    /// the pool does not hold succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = {
            let table = self.page_table.read();
            match table.get(&page_id) {
                // absence is idempotent success
                None => return Ok(()),
                Some(&frame_id) => {
                    let page = &self.frames[frame_id];
                    let mut meta = page.meta();
                    debug_assert_eq!(page_id, meta.page_id);
                    if meta.pin_count > 0 {
                        return Err(BufferPoolError::PagePinned(page_id));
                    }
                    // stake a claim so the frame cannot be victimized
                    meta.pin_count += 1;
                    frame_id
                }
            }
        };

        self.replacer.pin(frame_id);

        {
            let mut table = self.page_table.write();
            let page = &self.frames[frame_id];
            let mut meta = page.meta();
            if meta.pin_count > 1 {
                // someone re-pinned the page before we got here
                meta.pin_count -= 1;
                return Err(BufferPoolError::PagePinned(page_id));
            }

            /* No flush even if the page is dirty: it is being deleted.
             * The payload itself is reset when the frame leaves the free
             * list again. */
            meta.page_id = INVALID_PAGE_ID;
            meta.is_dirty = false;
            meta.just_dirtied = false;
            meta.pin_count = 0;
            drop(meta);

            table.remove(&page_id);
            self.deallocate_page(page_id);
        }

        self.free_list.lock().push_back(frame_id);
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        let page_id = self
            .next_page_id
            .fetch_add(self.num_instances as i32, Ordering::SeqCst);
        debug_assert_eq!(
            self.instance_index as i32,
            page_id % self.num_instances as i32
        );
        page_id
    }

    fn deallocate_page(&self, _page_id: PageId) {
        // Nothing to do without an allocation map tracking freed ids.
    }

    /// Grab a frame from the free list and install `requested` (or a
    /// freshly allocated id) into it. Returns the pinned frame, which may
    /// be a different one when a concurrent thread installed the same
    /// page first.
    fn free_list_get_frame(
        &self,
        requested: Option<PageId>,
    ) -> Result<Option<(FrameId, PageId)>, BufferPoolError> {
        let frame_id = match self.free_list.lock().pop_front() {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };
        let page = &self.frames[frame_id];

        let mut table = self.page_table.write();
        let (page_id, needs_io) = match requested {
            Some(page_id) => (page_id, true),
            None => (self.allocate_page(), false),
        };

        if let Some(&existing_frame) = table.get(&page_id) {
            /* Someone has already installed this page while we waited for
             * the lock; give our frame back and pin theirs. This cannot
             * happen for a new_page call, whose id is freshly allocated. */
            self.free_list.lock().push_back(frame_id);

            let existing = &self.frames[existing_frame];
            let old_pin = {
                let mut meta = existing.meta();
                let old_pin = meta.pin_count;
                meta.pin_count += 1;
                old_pin
            };
            drop(table);
            if old_pin == 0 {
                self.replacer.pin(existing_frame);
            }
            return Ok(Some((existing_frame, page_id)));
        }

        table.insert(page_id, frame_id);
        self.reset_page_meta(page, page_id);
        // take the write latch before the table lock goes, release after
        let mut data = page.data_mut();
        drop(table);

        data.fill(0);
        if needs_io {
            if let Err(e) = self.disk_manager.read_page(page_id, &mut data[..]) {
                drop(data);
                self.abandon_frame(frame_id, page_id);
                return Err(e.into());
            }
        } else {
            // a brand new page only exists in memory so far
            page.mark_dirty();
        }
        drop(data);
        Ok(Some((frame_id, page_id)))
    }

    /// Evict a victim frame and install `requested` (or a freshly
    /// allocated id) into it. Loops until a clean, unpinned victim
    /// survives the recheck under the exclusive table lock.
    fn replacer_get_frame(
        &self,
        requested: Option<PageId>,
    ) -> Result<Option<(FrameId, PageId)>, BufferPoolError> {
        loop {
            let frame_id = match self.replacer.victim() {
                Some(frame_id) => frame_id,
                None => return Ok(None),
            };
            let page = &self.frames[frame_id];

            let is_dirty = {
                let mut meta = page.meta();
                meta.pin_count += 1;
                meta.is_dirty
            };
            if is_dirty {
                if let Err(e) = self.flush_frame(page) {
                    let old_pin = {
                        let mut meta = page.meta();
                        let old_pin = meta.pin_count;
                        meta.pin_count -= 1;
                        old_pin
                    };
                    if old_pin == 1 {
                        self.replacer.unpin(frame_id);
                    }
                    return Err(e);
                }
            }

            let mut table = self.page_table.write();
            {
                let mut meta = page.meta();
                if meta.pin_count > 1 || meta.is_dirty {
                    /* Someone re-pinned or re-dirtied the frame before we
                     * got the table lock; give it up and retry. */
                    let old_pin = meta.pin_count;
                    meta.pin_count -= 1;
                    drop(meta);
                    drop(table);
                    if old_pin == 1 {
                        self.replacer.unpin(frame_id);
                    }
                    continue;
                }
            }

            let (page_id, needs_io) = match requested {
                Some(page_id) => (page_id, true),
                None => (self.allocate_page(), false),
            };

            if let Some(&existing_frame) = table.get(&page_id) {
                // someone has already installed the page we want
                {
                    let mut meta = page.meta();
                    meta.pin_count -= 1;
                }
                let existing = &self.frames[existing_frame];
                let old_pin = {
                    let mut meta = existing.meta();
                    let old_pin = meta.pin_count;
                    meta.pin_count += 1;
                    old_pin
                };
                drop(table);
                if old_pin == 0 {
                    self.replacer.pin(existing_frame);
                }
                /* The victim goes back under replacer control, otherwise
                 * it could never be selected again. */
                self.replacer.unpin(frame_id);
                return Ok(Some((existing_frame, page_id)));
            }

            let old_page_id = {
                let mut meta = page.meta();
                let old_page_id = meta.page_id;
                drop(meta);
                self.reset_page_meta(page, page_id);
                old_page_id
            };
            let mut data = page.data_mut();
            if old_page_id != INVALID_PAGE_ID {
                table.remove(&old_page_id);
            }
            table.insert(page_id, frame_id);
            drop(table);

            data.fill(0);
            if needs_io {
                if let Err(e) = self.disk_manager.read_page(page_id, &mut data[..]) {
                    drop(data);
                    self.abandon_frame(frame_id, page_id);
                    return Err(e.into());
                }
            } else {
                // a brand new page only exists in memory so far
                page.mark_dirty();
            }
            drop(data);
            return Ok(Some((frame_id, page_id)));
        }
    }

    fn reset_page_meta(&self, page: &Page, new_page_id: PageId) {
        let mut meta = page.meta();
        meta.page_id = new_page_id;
        meta.is_dirty = false;
        meta.just_dirtied = false;
        /* The frame was just taken from the free list or victimized, so
         * it is definitely not in the replacer. */
        meta.pin_count = 1;
    }

    /// Flush one frame during eviction. The caller holds a pin on it.
    fn flush_frame(&self, page: &Page) -> Result<(), BufferPoolError> {
        {
            let mut meta = page.meta();
            meta.just_dirtied = false;
        }
        let data = page.data();
        let page_id = page.id();
        self.disk_manager.write_page(page_id, &data[..])?;
        drop(data);

        let mut meta = page.meta();
        debug_assert!(meta.pin_count > 0);
        if !meta.just_dirtied {
            meta.is_dirty = false;
        }
        Ok(())
    }

    /// Back out of a failed page load: unmap the id and hand the frame
    /// back to the free list.
    fn abandon_frame(&self, frame_id: FrameId, page_id: PageId) {
        let mut table = self.page_table.write();
        table.remove(&page_id);
        let page = &self.frames[frame_id];
        {
            let mut meta = page.meta();
            meta.page_id = INVALID_PAGE_ID;
            meta.is_dirty = false;
            meta.just_dirtied = false;
            meta.pin_count = 0;
        }
        drop(table);
        self.free_list.lock().push_back(frame_id);
    }
}
