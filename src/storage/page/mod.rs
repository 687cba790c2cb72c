pub mod bucket;
pub mod codec;
pub mod directory;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::spinlock::{SpinLock, SpinLockGuard};
use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Book-keeping fields of a buffer pool page, all protected by the page's
/// meta-lock.
#[derive(Debug)]
pub struct PageMeta {
    pub page_id: PageId,
    pub pin_count: i32,
    pub is_dirty: bool,
    /// Set together with `is_dirty` whenever a writer dirties the page.
    /// A flusher clears it before writing and only un-dirties the page if
    /// it is still clear afterwards, so a write that lands during an
    /// in-flight flush is never lost.
    pub just_dirtied: bool,
}

/// Page is the basic unit of storage: a fixed-size byte payload plus the
/// book-keeping the buffer pool needs (pin count, dirty flag, page id).
///
/// Two locks guard a page. The reader-writer latch protects the byte
/// payload and must be held (read or write) for every payload access. The
/// meta-lock is a bounded spin lock protecting the book-keeping fields;
/// meta critical sections are a handful of field assignments, which is why
/// a full mutex is not worth its cost here.
pub struct Page {
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    meta: SpinLock<PageMeta>,
}

impl Page {
    pub(crate) fn new() -> Self {
        Self {
            data: RwLock::new(Box::new([0; PAGE_SIZE])),
            meta: SpinLock::new(PageMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
                just_dirtied: false,
            }),
        }
    }

    /// Acquire the page read latch and borrow the payload.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Acquire the page write latch and borrow the payload mutably.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Acquire the meta-lock.
    pub(crate) fn meta(&self) -> SpinLockGuard<'_, PageMeta> {
        self.meta.lock()
    }

    pub fn id(&self) -> PageId {
        self.meta.lock().page_id
    }

    pub fn pin_count(&self) -> i32 {
        self.meta.lock().pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().is_dirty
    }

    /// Mark the page dirty after modifying the payload. Must be called
    /// while holding the page's write latch, so the page is necessarily
    /// pinned.
    pub fn mark_dirty(&self) {
        let mut meta = self.meta.lock();
        debug_assert!(meta.pin_count > 0);
        meta.is_dirty = true;
        meta.just_dirtied = true;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta.lock();
        f.debug_struct("Page")
            .field("page_id", &meta.page_id)
            .field("pin_count", &meta.pin_count)
            .field("is_dirty", &meta.is_dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_zeroed() {
        let page = Page::new();
        assert_eq!(INVALID_PAGE_ID, page.id());
        assert_eq!(0, page.pin_count());
        assert!(!page.is_dirty());
        assert!(page.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mark_dirty_sets_both_flags() {
        let page = Page::new();
        page.meta().pin_count = 1;

        let guard = page.data_mut();
        page.mark_dirty();
        drop(guard);

        let meta = page.meta();
        assert!(meta.is_dirty);
        assert!(meta.just_dirtied);
    }

    #[test]
    fn test_concurrent_readers_share_latch() {
        let page = std::sync::Arc::new(Page::new());
        let r1 = page.data();
        let r2 = page.data();
        assert_eq!(r1[0], r2[0]);
    }
}
