//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use cairn_common::config::StorageConfig;
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::{CairnError, Result};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path of the data file.
    pub db_path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/cairn.db"),
            fsync_enabled: true,
        }
    }
}

impl DiskManagerConfig {
    /// Derives the disk configuration from the engine storage config.
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            db_path: config.db_path(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages to the data file.
///
/// The page space is flat: page `n` lives at byte offset `n * PAGE_SIZE`.
/// All I/O is blocking; a single mutex serialises file access.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open data file and its current page count.
    inner: Mutex<FileHandle>,
}

struct FileHandle {
    file: File,
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;
        tracing::debug!(path = %config.db_path.display(), num_pages, "opened data file");

        Ok(Self {
            config,
            inner: Mutex::new(FileHandle { file, num_pages }),
        })
    }

    /// Returns the path of the data file.
    pub fn db_path(&self) -> &Path {
        &self.config.db_path
    }

    /// Reads a page from disk into `buf`.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            return Err(CairnError::PageOutOfBounds { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;

        Ok(())
    }

    /// Writes a page to disk, extending the file if necessary.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Returns the number of pages in the data file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            db_path: dir.path().join("test.db"),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.db_path().exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_config_from_storage() {
        let storage = StorageConfig {
            data_dir: std::path::PathBuf::from("/tmp/cairn"),
            fsync_enabled: false,
            ..Default::default()
        };
        let config = DiskManagerConfig::from_storage(&storage);
        assert_eq!(config.db_path, storage.db_path());
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(PageId(0), &data).unwrap();

        let mut read_buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId(0), &mut read_buf).unwrap();
        assert_eq!(read_buf[0], 0xAB);
        assert_eq!(read_buf[100], 0xCD);
        assert_eq!(read_buf[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_nonexistent_page() {
        let (dm, _dir) = create_test_disk_manager();

        dm.write_page(PageId(0), &[0u8; PAGE_SIZE]).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        let result = dm.read_page(PageId(99), &mut buf);
        assert!(matches!(
            result,
            Err(CairnError::PageOutOfBounds { page_id: 99 })
        ));
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAA;
        dm.write_page(PageId(0), &data).unwrap();

        data[0] = 0xBB;
        dm.write_page(PageId(0), &data).unwrap();

        let mut read_buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId(0), &mut read_buf).unwrap();
        assert_eq!(read_buf[0], 0xBB);
    }

    #[test]
    fn test_disk_manager_extends_file() {
        let (dm, _dir) = create_test_disk_manager();

        dm.write_page(PageId(4), &[0x11u8; PAGE_SIZE]).unwrap();
        assert_eq!(dm.num_pages(), 5);

        // Pages 0..4 were never written but are readable (zero-filled holes).
        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(PageId(2), &mut buf).unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("persist.db");

        {
            let dm = DiskManager::new(DiskManagerConfig {
                db_path: db_path.clone(),
                fsync_enabled: true,
            })
            .unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(PageId(3), &data).unwrap();
        }

        {
            let dm = DiskManager::new(DiskManagerConfig {
                db_path,
                fsync_enabled: true,
            })
            .unwrap();
            assert_eq!(dm.num_pages(), 4);

            let mut buf = [0u8; PAGE_SIZE];
            dm.read_page(PageId(3), &mut buf).unwrap();
            assert_eq!(buf[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();
        dm.write_page(PageId(0), &[0u8; PAGE_SIZE]).unwrap();
        dm.flush().unwrap();
    }
}
