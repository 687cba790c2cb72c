use log::{error, warn};
use parking_lot::RwLock;

use crate::common::types::FrameId;

/// Sentinel slot used as the head of the circular list.
const NIL: usize = usize::MAX;

struct LruList {
    /// prev/next arena indexed by frame id; the sentinel lives at index
    /// `num_pages`. A frame is linked iff `linked[frame]` is set.
    prev: Vec<usize>,
    next: Vec<usize>,
    linked: Vec<bool>,
    frame_count: usize,
}

/// LRU replacement policy over the unpinned frames of one buffer pool
/// instance.
///
/// The frames form a doubly-linked list ordered LRU to MRU; since a frame
/// appears at most once, the links live in frame-indexed vectors, which
/// makes `victim`, `pin` and `unpin` all O(1).
pub struct LruReplacer {
    num_pages: usize,
    inner: RwLock<LruList>,
}

impl LruReplacer {
    pub fn new(num_pages: usize) -> Self {
        let sentinel = num_pages;
        let mut prev = vec![NIL; num_pages + 1];
        let mut next = vec![NIL; num_pages + 1];
        prev[sentinel] = sentinel;
        next[sentinel] = sentinel;

        Self {
            num_pages,
            inner: RwLock::new(LruList {
                prev,
                next,
                linked: vec![false; num_pages],
                frame_count: 0,
            }),
        }
    }

    /// Remove and return the frame unpinned longest ago, if any.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.inner.write();
        if list.frame_count == 0 {
            return None;
        }
        let sentinel = self.num_pages;
        let frame_id = list.prev[sentinel];
        debug_assert_ne!(sentinel, frame_id);
        list.unlink(frame_id);
        Some(frame_id)
    }

    /// Remove a frame from the replacer because it got pinned. No-op if
    /// the frame is not present.
    pub fn pin(&self, frame_id: FrameId) {
        if frame_id >= self.num_pages {
            error!("Invalid frame id = {}!", frame_id);
            return;
        }

        let mut list = self.inner.write();
        if !list.linked[frame_id] {
            return;
        }
        list.unlink(frame_id);
    }

    /// Add a frame at the MRU end because its pin count dropped to zero.
    /// No-op if the frame is already present.
    pub fn unpin(&self, frame_id: FrameId) {
        if frame_id >= self.num_pages {
            error!("Invalid frame id = {}!", frame_id);
            return;
        }

        let mut list = self.inner.write();
        if list.linked[frame_id] {
            warn!(
                "Trying to unpin frame {} multiple times, maybe dangerous in the upper level",
                frame_id
            );
            return;
        }
        let sentinel = self.num_pages;
        list.link_after(sentinel, frame_id);
    }

    /// Number of frames currently eligible for eviction.
    pub fn size(&self) -> usize {
        self.inner.read().frame_count
    }
}

impl LruList {
    fn unlink(&mut self, frame_id: usize) {
        debug_assert!(self.linked[frame_id]);
        let (prev, next) = (self.prev[frame_id], self.next[frame_id]);
        self.next[prev] = next;
        self.prev[next] = prev;
        self.prev[frame_id] = NIL;
        self.next[frame_id] = NIL;
        self.linked[frame_id] = false;
        self.frame_count -= 1;
    }

    fn link_after(&mut self, at: usize, frame_id: usize) {
        debug_assert!(!self.linked[frame_id]);
        let next = self.next[at];
        self.next[at] = frame_id;
        self.prev[frame_id] = at;
        self.next[frame_id] = next;
        self.prev[next] = frame_id;
        self.linked[frame_id] = true;
        self.frame_count += 1;
    }
}
