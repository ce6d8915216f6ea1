//! Header page: the directory of index roots.
//!
//! Page 0 holds `(index_name, root_page_id)` records. The B+ tree reads
//! and rewrites its record through a fetched header page whenever the root
//! changes.
//!
//! Layout: `record_count: u32`, then 36-byte records of a 32-byte
//! null-padded name followed by the root page id.

use cairn_buffer::BufferPoolManager;
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::{CairnError, Result};

/// Operations on the header page, over raw page bytes.
pub struct HeaderPage;

impl HeaderPage {
    /// Maximum index name length in bytes.
    pub const MAX_NAME_LEN: usize = 32;

    const RECORD_LEN: usize = Self::MAX_NAME_LEN + 4;
    const RECORDS_OFFSET: usize = 4;

    /// Maximum number of records the page can hold.
    pub const MAX_RECORDS: usize = (PAGE_SIZE - Self::RECORDS_OFFSET) / Self::RECORD_LEN;

    /// Initializes an empty header page.
    pub fn init(data: &mut [u8]) {
        data[0..4].copy_from_slice(&0u32.to_le_bytes());
    }

    /// Returns the number of records.
    pub fn record_count(data: &[u8]) -> usize {
        u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize
    }

    fn set_record_count(data: &mut [u8], count: usize) {
        data[0..4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn record_offset(index: usize) -> usize {
        Self::RECORDS_OFFSET + index * Self::RECORD_LEN
    }

    fn name_at(data: &[u8], index: usize) -> &[u8] {
        let off = Self::record_offset(index);
        let name = &data[off..off + Self::MAX_NAME_LEN];
        let len = name.iter().position(|&b| b == 0).unwrap_or(Self::MAX_NAME_LEN);
        &name[..len]
    }

    fn find_index(data: &[u8], name: &str) -> Option<usize> {
        (0..Self::record_count(data)).find(|&i| Self::name_at(data, i) == name.as_bytes())
    }

    /// Inserts a `(name, root_page_id)` record.
    ///
    /// Returns false when the name already exists, is too long, or the
    /// page is full.
    pub fn insert_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
        if name.is_empty() || name.len() > Self::MAX_NAME_LEN {
            return false;
        }
        let count = Self::record_count(data);
        if count >= Self::MAX_RECORDS || Self::find_index(data, name).is_some() {
            return false;
        }

        let off = Self::record_offset(count);
        data[off..off + Self::MAX_NAME_LEN].fill(0);
        data[off..off + name.len()].copy_from_slice(name.as_bytes());
        data[off + Self::MAX_NAME_LEN..off + Self::RECORD_LEN]
            .copy_from_slice(&root_page_id.0.to_le_bytes());
        Self::set_record_count(data, count + 1);
        true
    }

    /// Updates the root page id of an existing record. Returns false when
    /// the name is unknown.
    pub fn update_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
        let Some(index) = Self::find_index(data, name) else {
            return false;
        };
        let off = Self::record_offset(index) + Self::MAX_NAME_LEN;
        data[off..off + 4].copy_from_slice(&root_page_id.0.to_le_bytes());
        true
    }

    /// Deletes a record. Returns false when the name is unknown.
    pub fn delete_record(data: &mut [u8], name: &str) -> bool {
        let Some(index) = Self::find_index(data, name) else {
            return false;
        };
        let count = Self::record_count(data);
        let start = Self::record_offset(index + 1);
        let end = Self::record_offset(count);
        data.copy_within(start..end, Self::record_offset(index));
        Self::set_record_count(data, count - 1);
        true
    }

    /// Looks up the root page id registered under `name`.
    pub fn find_record(data: &[u8], name: &str) -> Option<PageId> {
        let index = Self::find_index(data, name)?;
        let off = Self::record_offset(index) + Self::MAX_NAME_LEN;
        Some(PageId(u32::from_le_bytes(
            data[off..off + 4].try_into().unwrap(),
        )))
    }
}

/// Claims page 0 as the header page on a fresh database.
///
/// A no-op when pages have already been allocated.
pub fn init_header_page(bpm: &BufferPoolManager) -> Result<()> {
    if bpm.allocated_pages() > 0 {
        return Ok(());
    }

    let (page_id, guard) = bpm.new_page_write()?;
    if page_id != PageId::HEADER {
        return Err(CairnError::TreeCorrupted(format!(
            "header page allocated as {page_id}"
        )));
    }
    let mut data = guard.data_mut();
    HeaderPage::init(&mut **data);
    guard.set_dirty();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_header() -> [u8; PAGE_SIZE] {
        let mut data = [0u8; PAGE_SIZE];
        HeaderPage::init(&mut data);
        data
    }

    #[test]
    fn test_header_init() {
        let data = new_header();
        assert_eq!(HeaderPage::record_count(&data), 0);
        assert_eq!(HeaderPage::find_record(&data, "missing"), None);
    }

    #[test]
    fn test_insert_and_find() {
        let mut data = new_header();

        assert!(HeaderPage::insert_record(&mut data, "orders_pk", PageId(7)));
        assert!(HeaderPage::insert_record(&mut data, "users_pk", PageId(9)));

        assert_eq!(HeaderPage::record_count(&data), 2);
        assert_eq!(HeaderPage::find_record(&data, "orders_pk"), Some(PageId(7)));
        assert_eq!(HeaderPage::find_record(&data, "users_pk"), Some(PageId(9)));
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut data = new_header();

        assert!(HeaderPage::insert_record(&mut data, "idx", PageId(1)));
        assert!(!HeaderPage::insert_record(&mut data, "idx", PageId(2)));
        assert_eq!(HeaderPage::find_record(&data, "idx"), Some(PageId(1)));
    }

    #[test]
    fn test_insert_name_too_long_fails() {
        let mut data = new_header();
        let long_name = "x".repeat(HeaderPage::MAX_NAME_LEN + 1);
        assert!(!HeaderPage::insert_record(&mut data, &long_name, PageId(1)));
        assert!(!HeaderPage::insert_record(&mut data, "", PageId(1)));
    }

    #[test]
    fn test_update_record() {
        let mut data = new_header();

        HeaderPage::insert_record(&mut data, "idx", PageId(1));
        assert!(HeaderPage::update_record(&mut data, "idx", PageId(99)));
        assert_eq!(HeaderPage::find_record(&data, "idx"), Some(PageId(99)));

        assert!(!HeaderPage::update_record(&mut data, "missing", PageId(5)));
    }

    #[test]
    fn test_delete_record() {
        let mut data = new_header();

        HeaderPage::insert_record(&mut data, "a", PageId(1));
        HeaderPage::insert_record(&mut data, "b", PageId(2));
        HeaderPage::insert_record(&mut data, "c", PageId(3));

        assert!(HeaderPage::delete_record(&mut data, "b"));
        assert_eq!(HeaderPage::record_count(&data), 2);
        assert_eq!(HeaderPage::find_record(&data, "b"), None);
        assert_eq!(HeaderPage::find_record(&data, "a"), Some(PageId(1)));
        assert_eq!(HeaderPage::find_record(&data, "c"), Some(PageId(3)));

        assert!(!HeaderPage::delete_record(&mut data, "b"));
    }

    #[test]
    fn test_fills_to_capacity() {
        let mut data = new_header();

        for i in 0..HeaderPage::MAX_RECORDS {
            assert!(HeaderPage::insert_record(
                &mut data,
                &format!("index_{i}"),
                PageId(i as u32)
            ));
        }
        assert!(!HeaderPage::insert_record(&mut data, "one_more", PageId(0)));
    }
}
