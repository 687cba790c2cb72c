use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::RwLock;

use crate::common::types::PageId;
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::{BufferPool, BufferPoolError};
use crate::storage::page::bucket::{BucketRead, BucketWrite};
use crate::storage::page::codec::FixedWidth;
use crate::storage::page::directory::{HashDirectoryPage, MAX_GLOBAL_DEPTH};
use crate::storage::page::Page;
use crate::transaction::Transaction;

/// How long to back off when the buffer pool is transiently exhausted.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot returned by `verify_integrity`.
#[derive(Debug)]
pub struct IndexStats {
    /// Number of live entries across all buckets.
    pub size: usize,
    pub global_depth: u32,
    /// Number of distinct bucket pages.
    pub num_buckets: usize,
}

/// A key -> value multimap stored as an extendible hash table whose
/// directory and bucket pages live in the buffer pool.
///
/// A single directory page maps the low `global_depth` bits of a key's
/// hash to a bucket page; buckets split when full and merge with their
/// split image when empty. Operations crab from the directory latch to
/// the bucket latch and release in reverse. The table-wide latch is held
/// in read mode by every operation; structural rewrites of the directory
/// serialize on the directory page's write latch.
pub struct ExtendibleHashIndex<K, V, S = BuildHasherDefault<DefaultHasher>> {
    directory_page_id: PageId,
    buffer_pool: Arc<dyn BufferPool>,
    table_latch: RwLock<()>,
    hash_builder: S,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashIndex<K, V>
where
    K: FixedWidth + Hash + PartialEq,
    V: FixedWidth + PartialEq,
{
    /// Create an index with the deterministic default hasher.
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Result<Self, HashIndexError> {
        Self::with_hasher(buffer_pool, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashIndex<K, V, S>
where
    K: FixedWidth + Hash + PartialEq,
    V: FixedWidth + PartialEq,
    S: BuildHasher,
{
    /// Create an index backed by `buffer_pool`, hashing keys with
    /// `hash_builder`. Allocates the directory page and bucket zero.
    pub fn with_hasher(
        buffer_pool: Arc<dyn BufferPool>,
        hash_builder: S,
    ) -> Result<Self, HashIndexError> {
        let (dir_page, directory_page_id) = Self::new_page_retry(&buffer_pool)?;
        // a zeroed payload is already a valid empty bucket
        let (_bucket_page, bucket_page_id) = Self::new_page_retry(&buffer_pool)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        {
            let mut dir_data = dir_page.data_mut();
            let mut dir = HashDirectoryPage::new(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
            dir.write_to(&mut dir_data[..]);
            dir_page.mark_dirty();
        }
        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            directory_page_id,
            buffer_pool,
            table_latch: RwLock::new(()),
            hash_builder,
            _marker: PhantomData,
        })
    }

    /// Truncate the hash to 32 bits for directory indexing.
    fn hash(&self, key: &K) -> u32 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn key_to_directory_index(&self, key: &K, dir: &HashDirectoryPage) -> usize {
        (self.hash(key) & dir.global_depth_mask()) as usize
    }

    /// Collect every value stored under `key` into `result`. Returns
    /// whether anything was found.
    pub fn get_value(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        result: &mut Vec<V>,
    ) -> Result<bool, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_retry(self.directory_page_id)?;
        let dir_data = dir_page.data();
        let dir = HashDirectoryPage::from_bytes(&dir_data[..]);
        let bucket_idx = self.key_to_directory_index(key, &dir);
        let bucket_page_id = dir.bucket_page_id(bucket_idx);

        // crabbing: latch the bucket before releasing the directory
        let bucket_page = self.fetch_retry(bucket_page_id)?;
        let bucket_data = bucket_page.data();
        drop(dir_data);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        BucketRead::<K, V>::new(&bucket_data[..]).get_value(key, result);
        drop(bucket_data);
        self.buffer_pool.unpin_page(bucket_page_id, false)?;

        Ok(!result.is_empty())
    }

    /// Insert a (key, value) pair. Fails on an exact duplicate, or when
    /// the directory is saturated and the target bucket cannot split.
    pub fn insert(
        &self,
        txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();

            let dir_page = self.fetch_retry(self.directory_page_id)?;
            let dir_data = dir_page.data();
            let dir = HashDirectoryPage::from_bytes(&dir_data[..]);
            let bucket_idx = self.key_to_directory_index(key, &dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);

            // crabbing: latch the bucket before releasing the directory
            let bucket_page = self.fetch_retry(bucket_page_id)?;
            let mut bucket_data = bucket_page.data_mut();
            drop(dir_data);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            let mut bucket = BucketWrite::<K, V>::new(&mut bucket_data[..]);
            if !bucket.is_full() {
                let inserted = bucket.insert(key, value);
                drop(bucket);
                if inserted {
                    bucket_page.mark_dirty();
                }
                drop(bucket_data);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                return Ok(inserted);
            }

            // the bucket is full; restart with directory write access
            drop(bucket);
            drop(bucket_data);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }
        self.split_insert(txn, key, value)
    }

    /// Slow insertion path: split the target bucket, growing the
    /// directory when its depth is exhausted, then place the pair. Loops
    /// when every entry of the split bucket lands on the same side again.
    fn split_insert(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        loop {
            let _table = self.table_latch.read();

            let dir_page = self.fetch_retry(self.directory_page_id)?;
            let mut dir_data = dir_page.data_mut();
            let mut dir = HashDirectoryPage::from_bytes(&dir_data[..]);

            // re-resolve: a concurrent split may have rerouted the key
            let bucket_idx = self.key_to_directory_index(key, &dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let bucket_page = self.fetch_retry(bucket_page_id)?;
            let mut bucket_data = bucket_page.data_mut();

            if !BucketRead::<K, V>::new(&bucket_data[..]).is_full() {
                // someone has already split the bucket for us
                drop(dir_data);
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;

                let inserted = BucketWrite::<K, V>::new(&mut bucket_data[..]).insert(key, value);
                if inserted {
                    bucket_page.mark_dirty();
                }
                drop(bucket_data);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                return Ok(inserted);
            }

            if dir.local_depth(bucket_idx) == dir.global_depth() {
                if dir.global_depth() >= MAX_GLOBAL_DEPTH {
                    warn!("Hash index directory is saturated, cannot split any further.");
                    drop(dir_data);
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    drop(bucket_data);
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    return Ok(false);
                }
                dir.incr_global_depth();
            }

            let (split_page, split_page_id) = Self::new_page_retry(&self.buffer_pool)?;

            let high_bit = dir.local_high_bit(bucket_idx);
            let split_image_idx = bucket_idx ^ high_bit;
            let new_depth = dir.local_depth(bucket_idx) + 1;
            let low_mask = high_bit - 1;
            /* Every directory slot aliasing the pre-split bucket deepens;
             * the half matching the split image's distinguishing bit now
             * points at the new page. */
            for i in 0..dir.size() {
                if i & low_mask != bucket_idx & low_mask {
                    continue;
                }
                dir.set_local_depth(i, new_depth);
                if i & high_bit == split_image_idx & high_bit {
                    dir.set_bucket_page_id(i, split_page_id);
                }
            }

            // latch the new bucket, then let the directory go
            let mut split_data = split_page.data_mut();
            dir.write_to(&mut dir_data[..]);
            dir_page.mark_dirty();
            drop(dir_data);
            self.buffer_pool.unpin_page(self.directory_page_id, true)?;

            let high_bit_mask = high_bit as u32;
            let image_bit = (split_image_idx & high_bit) as u32;
            let mut moved = 0usize;
            let mut bucket_dirty = false;
            let mut split_dirty = false;

            let (inserted, placed) = {
                let mut bucket = BucketWrite::<K, V>::new(&mut bucket_data[..]);
                let mut split_bucket = BucketWrite::<K, V>::new(&mut split_data[..]);

                for slot in 0..bucket.capacity() {
                    if !bucket.is_readable(slot) {
                        continue;
                    }
                    let slot_key = bucket.key_at(slot);
                    if self.hash(&slot_key) & high_bit_mask != image_bit {
                        continue;
                    }
                    let slot_value = bucket.value_at(slot);
                    bucket.remove_at(slot);
                    split_bucket.insert_at(moved, &slot_key, &slot_value);
                    moved += 1;
                }
                if moved > 0 {
                    bucket_dirty = true;
                    split_dirty = true;
                }

                if self.hash(key) & high_bit_mask == image_bit {
                    let inserted = split_bucket.insert(key, value);
                    split_dirty |= inserted;
                    (inserted, true)
                } else if moved > 0 {
                    let inserted = bucket.insert(key, value);
                    bucket_dirty |= inserted;
                    (inserted, true)
                } else {
                    /* The split image stayed empty and the new key hashes
                     * into the still-full bucket: split once more. */
                    (false, false)
                }
            };

            if bucket_dirty {
                bucket_page.mark_dirty();
            }
            if split_dirty {
                split_page.mark_dirty();
            }
            drop(split_data);
            drop(bucket_data);
            self.buffer_pool.unpin_page(split_page_id, split_dirty)?;
            self.buffer_pool.unpin_page(bucket_page_id, bucket_dirty)?;

            if placed {
                return Ok(inserted);
            }
        }
    }

    /// Remove a (key, value) pair, merging the bucket away if the removal
    /// leaves it empty.
    pub fn remove(
        &self,
        _txn: Option<&Transaction>,
        key: &K,
        value: &V,
    ) -> Result<bool, HashIndexError> {
        let (removed, empty_after, bucket_idx) = {
            let _table = self.table_latch.read();

            let dir_page = self.fetch_retry(self.directory_page_id)?;
            let dir_data = dir_page.data();
            let dir = HashDirectoryPage::from_bytes(&dir_data[..]);
            let bucket_idx = self.key_to_directory_index(key, &dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);

            // crabbing: latch the bucket before releasing the directory
            let bucket_page = self.fetch_retry(bucket_page_id)?;
            let mut bucket_data = bucket_page.data_mut();
            drop(dir_data);
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;

            let mut bucket = BucketWrite::<K, V>::new(&mut bucket_data[..]);
            let removed = bucket.remove(key, value);
            let empty_after = bucket.is_empty();
            drop(bucket);
            if removed {
                bucket_page.mark_dirty();
            }
            drop(bucket_data);
            self.buffer_pool.unpin_page(bucket_page_id, removed)?;

            (removed, empty_after, bucket_idx)
        };

        if empty_after {
            self.merge(bucket_idx)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image, shrinking the directory
    /// when possible, and keep merging along the chain of split images
    /// while they are empty too.
    fn merge(&self, start_idx: usize) -> Result<(), HashIndexError> {
        let mut target_idx = start_idx;
        loop {
            let orphan_page_id;
            let next_idx;
            {
                let _table = self.table_latch.read();

                let dir_page = self.fetch_retry(self.directory_page_id)?;
                let mut dir_data = dir_page.data_mut();
                let mut dir = HashDirectoryPage::from_bytes(&dir_data[..]);

                // the directory may have changed since the removal
                let bucket_idx = target_idx & dir.global_depth_mask() as usize;
                let local_depth = dir.local_depth(bucket_idx);
                if local_depth == 0 {
                    drop(dir_data);
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    return Ok(());
                }
                let bucket_page_id = dir.bucket_page_id(bucket_idx);

                let bucket_page = self.fetch_retry(bucket_page_id)?;
                let bucket_data = bucket_page.data();
                let is_empty = BucketRead::<K, V>::new(&bucket_data[..]).is_empty();
                drop(bucket_data);
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                if !is_empty {
                    drop(dir_data);
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    return Ok(());
                }

                let high_bit = 1usize << (local_depth - 1);
                let split_image_idx = bucket_idx ^ high_bit;
                if dir.local_depth(split_image_idx) != local_depth {
                    drop(dir_data);
                    self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                    return Ok(());
                }
                let split_image_page_id = dir.bucket_page_id(split_image_idx);

                /* Every slot matching the merging bucket in the low
                 * new-depth bits flattens onto the split image. */
                let new_depth = local_depth - 1;
                let low_mask = high_bit - 1;
                for i in 0..dir.size() {
                    if i & low_mask == bucket_idx & low_mask {
                        dir.set_local_depth(i, new_depth);
                        dir.set_bucket_page_id(i, split_image_page_id);
                    }
                }
                if dir.can_shrink() {
                    dir.decr_global_depth();
                }
                dir.write_to(&mut dir_data[..]);
                dir_page.mark_dirty();
                drop(dir_data);
                self.buffer_pool.unpin_page(self.directory_page_id, true)?;

                orphan_page_id = bucket_page_id;
                next_idx = split_image_idx;
            }

            /* No directory slot points at the orphan any more. A reader
             * that resolved it before the merge may still pin it, so the
             * delete is best-effort. */
            if let Err(e) = self.buffer_pool.delete_page(orphan_page_id) {
                warn!(
                    "Failed to delete merged bucket page {}: {}",
                    orphan_page_id, e
                );
            }

            target_idx = next_idx;
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_retry(self.directory_page_id)?;
        let dir_data = dir_page.data();
        let dir = HashDirectoryPage::from_bytes(&dir_data[..]);
        let global_depth = dir.global_depth();
        drop(dir_data);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(global_depth)
    }

    /// Check the directory invariants (panicking on a violation) and
    /// gather size statistics.
    pub fn verify_integrity(&self) -> Result<IndexStats, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_retry(self.directory_page_id)?;
        let dir_data = dir_page.data();
        let dir = HashDirectoryPage::from_bytes(&dir_data[..]);
        dir.verify_integrity();

        let mut visited = HashSet::new();
        let mut size = 0;
        for i in 0..dir.size() {
            let bucket_page_id = dir.bucket_page_id(i);
            if !visited.insert(bucket_page_id) {
                continue;
            }
            let bucket_page = self.fetch_retry(bucket_page_id)?;
            let bucket_data = bucket_page.data();
            size += BucketRead::<K, V>::new(&bucket_data[..]).num_readable();
            drop(bucket_data);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }

        let stats = IndexStats {
            size,
            global_depth: dir.global_depth(),
            num_buckets: visited.len(),
        };
        drop(dir_data);
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(stats)
    }

    /// Fetch a page, backing off while the buffer pool is exhausted; the
    /// index never fails an operation over a transient frame shortage.
    fn fetch_retry(&self, page_id: PageId) -> Result<Arc<Page>, HashIndexError> {
        Self::fetch_page_retry(&self.buffer_pool, page_id)
    }

    fn fetch_page_retry(
        buffer_pool: &Arc<dyn BufferPool>,
        page_id: PageId,
    ) -> Result<Arc<Page>, HashIndexError> {
        loop {
            match buffer_pool.fetch_page(page_id) {
                Ok(page) => return Ok(page),
                Err(BufferPoolError::PoolExhausted) => {
                    warn!("Failed to fetch page {} for the hash index, buffer pool is full right now.", page_id);
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn new_page_retry(
        buffer_pool: &Arc<dyn BufferPool>,
    ) -> Result<(Arc<Page>, PageId), HashIndexError> {
        loop {
            match buffer_pool.new_page() {
                Ok(page) => return Ok(page),
                Err(BufferPoolError::PoolExhausted) => {
                    warn!("Failed to create a page for the hash index, buffer pool is full right now.");
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
