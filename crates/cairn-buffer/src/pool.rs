//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::hash_table::ExtendibleHashTable;
use crate::replacer::{LruKReplacer, Replacer};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use sysinfo::System;
use cairn_common::config::StorageConfig;
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::{CairnError, Result};
use cairn_disk::{DiskManager, LogManager};

/// Bucket size for the page table's extendible hash directory.
const PAGE_TABLE_BUCKET_SIZE: usize = 16;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// K parameter for LRU-K replacement.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

impl BufferPoolConfig {
    /// Derives the pool configuration from the engine storage config.
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            pool_size: config.buffer_pool_pages,
            replacer_k: config.replacer_k,
        }
    }
}

/// Buffer pool manager.
///
/// Owns a fixed array of page frames and coordinates:
/// - Page id to frame id mapping (extendible hash page table)
/// - Free frame list for new pages
/// - LRU-K replacement for eviction
/// - Pin counting and dirty tracking, with flush-on-evict
///
/// One coarse latch serialises every public method; page-content
/// concurrency goes through the per-frame reader/writer latch, acquired by
/// callers after pinning.
pub struct BufferPoolManager {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Disk manager for page I/O.
    disk: Arc<DiskManager>,
    /// Log manager, held for write-ahead logging integration.
    #[allow(dead_code)]
    log: Arc<LogManager>,
    /// Free frame list and the page-id allocator, behind the pool latch.
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    free_list: Vec<FrameId>,
    next_page_id: u32,
}

impl BufferPoolManager {
    /// Creates a new buffer pool manager.
    ///
    /// `next_page_id` is seeded from the disk page count so a reopened
    /// database keeps allocating monotonically.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>, log: Arc<LogManager>) -> Self {
        let pool_size = config.pool_size;

        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list; pop from the back.
        let free_list: Vec<_> = (0..pool_size).rev().map(|i| FrameId(i as u32)).collect();

        let next_page_id = disk.num_pages();

        Self {
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            disk,
            log,
            inner: Mutex::new(PoolInner {
                free_list,
                next_page_id,
            }),
            config,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching even on low-memory
    /// systems.
    pub fn auto_sized(disk: Arc<DiskManager>, log: Arc<LogManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let pool_size = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                pool_size,
                ..Default::default()
            },
            disk,
            log,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of page ids allocated so far.
    pub fn allocated_pages(&self) -> u32 {
        self.inner.lock().next_page_id
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(&page_id)
    }

    /// Acquires a frame for a new or incoming page: the free list first,
    /// then eviction. A dirty victim is flushed before reuse.
    fn acquire_frame(&self, inner: &mut MutexGuard<'_, PoolInner>) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }

        let victim_id = self.replacer.evict().ok_or(CairnError::PoolExhausted)?;
        let frame = &self.frames[victim_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
            }
            self.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// Allocates a fresh page and pins it.
    ///
    /// The frame is zeroed and the new page is written to disk so later
    /// reads of an evicted-but-untouched page succeed. Fails with
    /// `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }

        Ok((page_id, frame))
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The page is pinned before being returned. Fails with
    /// `PoolExhausted` when the page is not resident and every frame is
    /// pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        {
            let mut data = frame.write_data();
            self.disk.read_page(page_id, &mut data)?;
        }
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        Ok(frame)
    }

    /// Unpins a page, ORing in the dirty flag.
    ///
    /// Returns false when the page is not resident or its pin count is
    /// already zero. When the pin count reaches zero the frame becomes
    /// evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page's bytes to disk and clears the dirty flag, regardless
    /// of pin state. Returns false when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _inner = self.inner.lock();
        self.flush_page_locked(page_id)
    }

    fn flush_page_locked(&self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];
        {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock();
        for raw in 0..inner.next_page_id {
            self.flush_page_locked(PageId(raw))?;
        }
        Ok(())
    }

    /// Deletes a page from the pool, returning its frame to the free list.
    ///
    /// Returns `Ok(true)` when the page is not resident, `Ok(false)` when
    /// it is pinned. Page ids are not recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return Ok(false);
        }

        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);
        frame.reset();
        inner.free_list.push(frame_id);
        Ok(true)
    }

    /// Fetches a page behind a read guard that unpins on drop.
    pub fn read_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageReadGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Fetches a page behind a write guard that unpins on drop.
    pub fn write_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Allocates a new page behind a write guard.
    pub fn new_page_write(&self) -> Result<(PageId, PageWriteGuard<'_>)> {
        let (page_id, frame) = self.new_page()?;
        Ok((
            page_id,
            PageWriteGuard {
                pool: self,
                page_id,
                frame,
            },
        ))
    }
}

/// RAII guard for reading a page. Unpins (clean) on drop.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the page-content latch in shared mode.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for writing a page. Unpins on drop, carrying the dirty flag.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the page-content latch in shared mode.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Takes the page-content latch in exclusive mode.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_disk::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_pool(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                db_path: dir.path().join("test.db"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let log = Arc::new(LogManager::new(dir.path().join("test.log"), false).unwrap());
        let pool = BufferPoolManager::new(
            BufferPoolConfig {
                pool_size,
                replacer_k: 2,
            },
            disk,
            log,
        );
        (pool, dir)
    }

    #[test]
    fn test_pool_new() {
        let (pool, _dir) = create_test_pool(10);

        assert_eq!(pool.pool_size(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.allocated_pages(), 0);
    }

    #[test]
    fn test_config_from_storage() {
        let storage = StorageConfig {
            buffer_pool_pages: 64,
            replacer_k: 3,
            ..Default::default()
        };
        let config = BufferPoolConfig::from_storage(&storage);
        assert_eq!(config.pool_size, 64);
        assert_eq!(config.replacer_k, 3);
    }

    #[test]
    fn test_new_page_allocates_monotonically() {
        let (pool, _dir) = create_test_pool(10);

        let (pid0, frame0) = pool.new_page().unwrap();
        assert_eq!(pid0, PageId(0));
        assert_eq!(frame0.page_id(), Some(pid0));
        assert_eq!(frame0.pin_count(), 1);

        let (pid1, _) = pool.new_page().unwrap();
        assert_eq!(pid1, PageId(1));

        assert_eq!(pool.free_count(), 8);
        assert!(pool.contains(pid0));
        assert!(pool.contains(pid1));
    }

    #[test]
    fn test_fetch_resident_page() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();
        pool.unpin_page(pid, false);

        let frame = pool.fetch_page(pid).unwrap();
        assert_eq!(frame.page_id(), Some(pid));
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_unpin() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, frame) = pool.new_page().unwrap();
        assert!(frame.is_pinned());

        assert!(pool.unpin_page(pid, false));
        assert!(!frame.is_pinned());

        // Double unpin is a caller error.
        assert!(!pool.unpin_page(pid, false));

        // Unknown page.
        assert!(!pool.unpin_page(PageId(999), false));
    }

    #[test]
    fn test_dirty_flag_survives_clean_unpin() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();
        pool.fetch_page(pid).unwrap();

        // One unpin dirty, one clean: the dirty flag must be ORed in.
        pool.unpin_page(pid, true);
        pool.unpin_page(pid, false);

        let frame = pool.fetch_page(pid).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_pool_exhausted_when_all_pinned() {
        let (pool, _dir) = create_test_pool(3);

        for _ in 0..3 {
            pool.new_page().unwrap();
        }

        assert!(matches!(pool.new_page(), Err(CairnError::PoolExhausted)));

        let result = pool.fetch_page(PageId(99));
        assert!(matches!(result, Err(CairnError::PoolExhausted)));
    }

    #[test]
    fn test_pool_size_fetches_then_one_more_fails() {
        let (pool, _dir) = create_test_pool(4);

        // Allocate pool_size + 1 pages, releasing each pin.
        let mut pids = Vec::new();
        for _ in 0..5 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, false);
            pids.push(pid);
        }

        // Fetch pool_size distinct pages; all pinned with count 1.
        for &pid in &pids[..4] {
            let frame = pool.fetch_page(pid).unwrap();
            assert_eq!(frame.pin_count(), 1);
        }

        // One more fetch has no frame to claim.
        assert!(matches!(
            pool.fetch_page(pids[4]),
            Err(CairnError::PoolExhausted)
        ));
    }

    #[test]
    fn test_eviction_roundtrip_preserves_dirty_bytes() {
        let (pool, _dir) = create_test_pool(1);

        let (pid1, frame) = pool.new_page().unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(pid1, true);

        // Allocating another page evicts the dirty page to disk.
        let (pid2, _) = pool.new_page().unwrap();
        assert!(!pool.contains(pid1));
        pool.unpin_page(pid2, false);

        // Fetching it back reads the dirtied bytes from disk.
        let frame = pool.fetch_page(pid1).unwrap();
        assert_eq!(frame.read_data()[0], 0xAB);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_delete_page() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();
        pool.unpin_page(pid, false);

        assert!(pool.contains(pid));
        assert!(pool.delete_page(pid).unwrap());
        assert!(!pool.contains(pid));
        assert_eq!(pool.free_count(), 10);

        // Deleting a non-resident page succeeds trivially.
        assert!(pool.delete_page(pid).unwrap());
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();

        assert!(!pool.delete_page(pid).unwrap());
        assert!(pool.contains(pid));
    }

    #[test]
    fn test_flush_page() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, frame) = pool.new_page().unwrap();
        frame.write_data()[7] = 0x42;
        pool.unpin_page(pid, true);

        assert!(pool.flush_page(pid).unwrap());

        let frame = pool.fetch_page(pid).unwrap();
        assert!(!frame.is_dirty());

        assert!(!pool.flush_page(PageId(999)).unwrap());
    }

    #[test]
    fn test_flush_all_pages() {
        let (pool, _dir) = create_test_pool(10);

        for _ in 0..5 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, true);
        }

        pool.flush_all_pages().unwrap();

        for raw in 0..5 {
            let frame = pool.fetch_page(PageId(raw)).unwrap();
            assert!(!frame.is_dirty());
            pool.unpin_page(PageId(raw), false);
        }
    }

    #[test]
    fn test_read_guard_unpins_on_drop() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();
        pool.unpin_page(pid, false);

        {
            let guard = pool.read_page(pid).unwrap();
            assert_eq!(guard.page_id(), pid);
        }

        let frame = pool.fetch_page(pid).unwrap();
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let (pool, _dir) = create_test_pool(10);

        let (pid, _) = pool.new_page().unwrap();
        pool.unpin_page(pid, false);

        {
            let guard = pool.write_page(pid).unwrap();
            guard.data_mut()[0] = 0xFF;
            guard.set_dirty();
        }

        let frame = pool.fetch_page(pid).unwrap();
        assert!(frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0xFF);
    }

    #[test]
    fn test_reopened_pool_keeps_allocating() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let log_path = dir.path().join("test.log");

        {
            let disk = Arc::new(
                DiskManager::new(DiskManagerConfig {
                    db_path: db_path.clone(),
                    fsync_enabled: false,
                })
                .unwrap(),
            );
            let log = Arc::new(LogManager::new(&log_path, false).unwrap());
            let pool = BufferPoolManager::new(BufferPoolConfig::default(), disk, log);
            for _ in 0..3 {
                let (pid, _) = pool.new_page().unwrap();
                pool.unpin_page(pid, false);
            }
            pool.flush_all_pages().unwrap();
        }

        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                db_path,
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let log = Arc::new(LogManager::new(&log_path, false).unwrap());
        let pool = BufferPoolManager::new(BufferPoolConfig::default(), disk, log);
        assert_eq!(pool.allocated_pages(), 3);

        let (pid, _) = pool.new_page().unwrap();
        assert_eq!(pid, PageId(3));
    }
}
