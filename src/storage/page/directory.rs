//! Directory page of the extendible hash index.
//!
//! The directory maps the low `global_depth` bits of a key's hash to a
//! bucket page. One physical bucket page may back many directory slots;
//! any two slots equal in their low `local_depth` bits point to the same
//! bucket and carry the same local depth.

use byteorder::{ByteOrder, NativeEndian};

use crate::common::types::{Lsn, PageId, INVALID_PAGE_ID};

/// Maximum number of directory slots a directory page can hold.
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

/// Hard ceiling on the global depth: `2^9` slots fill the directory.
pub const MAX_GLOBAL_DEPTH: u32 = 9;

const OFFSET_PAGE_ID: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_GLOBAL_DEPTH: usize = 8;
const OFFSET_LOCAL_DEPTHS: usize = 12;
const OFFSET_BUCKET_PAGE_IDS: usize = OFFSET_LOCAL_DEPTHS + DIRECTORY_ARRAY_SIZE;

/// In-memory image of a directory page. Loaded from and stored to the raw
/// page payload around each directory access; layout is
/// `page_id | lsn | global_depth | local_depth[512] | bucket_page_id[512]`
/// in host byte order.
pub struct HashDirectoryPage {
    page_id: PageId,
    lsn: Lsn,
    global_depth: u32,
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashDirectoryPage {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: 0,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut local_depths = [0u8; DIRECTORY_ARRAY_SIZE];
        local_depths.copy_from_slice(&bytes[OFFSET_LOCAL_DEPTHS..OFFSET_BUCKET_PAGE_IDS]);

        let mut bucket_page_ids = [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE];
        for (i, id) in bucket_page_ids.iter_mut().enumerate() {
            let offset = OFFSET_BUCKET_PAGE_IDS + i * 4;
            *id = NativeEndian::read_i32(&bytes[offset..offset + 4]);
        }

        Self {
            page_id: NativeEndian::read_i32(&bytes[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4]),
            lsn: NativeEndian::read_u32(&bytes[OFFSET_LSN..OFFSET_LSN + 4]),
            global_depth: NativeEndian::read_u32(&bytes[OFFSET_GLOBAL_DEPTH..OFFSET_GLOBAL_DEPTH + 4]),
            local_depths,
            bucket_page_ids,
        }
    }

    pub fn write_to(&self, bytes: &mut [u8]) {
        NativeEndian::write_i32(&mut bytes[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 4], self.page_id);
        NativeEndian::write_u32(&mut bytes[OFFSET_LSN..OFFSET_LSN + 4], self.lsn);
        NativeEndian::write_u32(
            &mut bytes[OFFSET_GLOBAL_DEPTH..OFFSET_GLOBAL_DEPTH + 4],
            self.global_depth,
        );
        bytes[OFFSET_LOCAL_DEPTHS..OFFSET_BUCKET_PAGE_IDS].copy_from_slice(&self.local_depths);
        for (i, id) in self.bucket_page_ids.iter().enumerate() {
            let offset = OFFSET_BUCKET_PAGE_IDS + i * 4;
            NativeEndian::write_i32(&mut bytes[offset..offset + 4], *id);
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask with exactly `global_depth` low-order ones.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Number of live directory slots.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn bucket_page_id(&self, idx: usize) -> PageId {
        debug_assert!(idx < self.size());
        self.bucket_page_ids[idx]
    }

    pub fn set_bucket_page_id(&mut self, idx: usize, page_id: PageId) {
        debug_assert!(idx < self.size());
        self.bucket_page_ids[idx] = page_id;
    }

    pub fn local_depth(&self, idx: usize) -> u32 {
        debug_assert!(idx < self.size());
        self.local_depths[idx] as u32
    }

    pub fn set_local_depth(&mut self, idx: usize, depth: u32) {
        debug_assert!(idx < self.size());
        debug_assert!(depth <= self.global_depth);
        self.local_depths[idx] = depth as u8;
    }

    /// The bit that distinguishes a bucket from the split image it would
    /// produce on its next split.
    pub fn local_high_bit(&self, idx: usize) -> usize {
        1 << self.local_depth(idx)
    }

    /// Double the directory: every new slot mirrors the slot it aliases
    /// in the lower half.
    pub fn incr_global_depth(&mut self) {
        debug_assert!(self.global_depth < MAX_GLOBAL_DEPTH);
        let old_size = self.size();
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    /// Halve the directory.
    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// The directory can shrink when no bucket uses all of the global
    /// depth's bits.
    pub fn can_shrink(&self) -> bool {
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
    }

    /// Check the directory invariants, panicking on a violation:
    /// every local depth is bounded by the global depth, all slots that
    /// alias a bucket page agree on its local depth, and each bucket page
    /// is referenced by exactly `2^(global_depth - local_depth)` slots.
    pub fn verify_integrity(&self) {
        use std::collections::HashMap;

        let mut page_id_counts: HashMap<PageId, usize> = HashMap::new();
        let mut page_id_depths: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            let depth = self.local_depth(i);
            assert!(
                depth <= self.global_depth,
                "local depth {} at slot {} exceeds global depth {}",
                depth,
                i,
                self.global_depth
            );
            assert_ne!(INVALID_PAGE_ID, page_id, "slot {} has no bucket page", i);

            *page_id_counts.entry(page_id).or_insert(0) += 1;
            match page_id_depths.get(&page_id) {
                Some(&known) => assert_eq!(
                    known, depth,
                    "slots sharing bucket page {} disagree on local depth",
                    page_id
                ),
                None => {
                    page_id_depths.insert(page_id, depth);
                }
            }
        }

        for (page_id, count) in &page_id_counts {
            let depth = page_id_depths[page_id];
            let expected = 1usize << (self.global_depth - depth);
            assert_eq!(
                expected, *count,
                "bucket page {} is referenced {} times, expected {}",
                page_id, count, expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    #[test]
    fn test_layout_fits_in_page() {
        assert!(OFFSET_BUCKET_PAGE_IDS + DIRECTORY_ARRAY_SIZE * 4 <= PAGE_SIZE);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut dir = HashDirectoryPage::new(10);
        dir.set_lsn(100);
        dir.set_bucket_page_id(0, 3);
        dir.incr_global_depth();
        dir.set_bucket_page_id(1, 4);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);

        let mut bytes = vec![0u8; PAGE_SIZE];
        dir.write_to(&mut bytes);
        let restored = HashDirectoryPage::from_bytes(&bytes);

        assert_eq!(10, restored.page_id());
        assert_eq!(100, restored.lsn());
        assert_eq!(1, restored.global_depth());
        assert_eq!(3, restored.bucket_page_id(0));
        assert_eq!(4, restored.bucket_page_id(1));
        assert_eq!(1, restored.local_depth(0));
    }

    #[test]
    fn test_grow_duplicates_slots() {
        let mut dir = HashDirectoryPage::new(0);
        dir.set_bucket_page_id(0, 7);

        for _ in 0..3 {
            dir.incr_global_depth();
        }
        assert_eq!(3, dir.global_depth());
        assert_eq!(0x07, dir.global_depth_mask());
        for i in 0..8 {
            assert_eq!(7, dir.bucket_page_id(i));
            assert_eq!(0, dir.local_depth(i));
        }
        assert!(dir.can_shrink());
        dir.verify_integrity();
    }

    #[test]
    fn test_can_shrink() {
        let mut dir = HashDirectoryPage::new(0);
        dir.set_bucket_page_id(0, 1);
        dir.incr_global_depth();
        dir.set_bucket_page_id(1, 2);
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);

        assert!(!dir.can_shrink());
        dir.verify_integrity();

        dir.set_bucket_page_id(1, 1);
        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        assert!(dir.can_shrink());
        dir.decr_global_depth();
        assert_eq!(0, dir.global_depth());
    }

    #[test]
    #[should_panic(expected = "disagree on local depth")]
    fn test_verify_catches_depth_mismatch() {
        let mut dir = HashDirectoryPage::new(0);
        dir.set_bucket_page_id(0, 1);
        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 0);
        dir.verify_integrity();
    }
}
