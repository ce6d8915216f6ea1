//! Forward cursor over the B+ tree leaf chain.

use std::marker::PhantomData;
use std::sync::Arc;
use crate::btree::page::LeafPage;
use crate::btree::types::BPlusTreePage;
use crate::key::IndexKey;
use cairn_buffer::BufferPoolManager;
use cairn_common::page::PageId;
use cairn_common::types::RecordId;
use cairn_common::Result;

/// Forward ordered cursor over leaf entries.
///
/// Holds only `(page_id, offset)`; each dereference fetches the leaf,
/// reads the entry, and unpins before returning. The end sentinel carries
/// `PageId::INVALID`.
pub struct IndexIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    offset: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> IndexIterator<K> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, offset: usize) -> Self {
        Self {
            bpm,
            page_id,
            offset,
            _key: PhantomData,
        }
    }

    /// Returns true when the cursor is past the last entry.
    pub fn is_end(&self) -> bool {
        self.page_id == PageId::INVALID
    }

    /// Returns the leaf page the cursor is positioned on.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the offset within the current leaf.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the entry under the cursor.
    pub fn entry(&self) -> Result<(K, RecordId)> {
        let guard = self.bpm.read_page(self.page_id)?;
        let data = guard.data();
        Ok((
            LeafPage::<K>::key_at(&**data, self.offset),
            LeafPage::<K>::value_at(&**data, self.offset),
        ))
    }

    /// Advances within the leaf, following the next-leaf pointer (and
    /// resetting the offset) when the current leaf is exhausted. The
    /// current leaf is unpinned before the cursor moves on.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }

        self.offset += 1;
        let guard = self.bpm.read_page(self.page_id)?;
        let data = guard.data();
        if self.offset >= BPlusTreePage::size(&**data) as usize {
            self.page_id = LeafPage::<K>::next_page_id(&**data);
            self.offset = 0;
        }
        Ok(())
    }
}

impl<K: IndexKey> PartialEq for IndexIterator<K> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.offset == other.offset
    }
}

impl<K: IndexKey> Eq for IndexIterator<K> {}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = Result<(K, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(e) => {
                self.page_id = PageId::INVALID;
                return Some(Err(e));
            }
        };
        if let Err(e) = self.advance() {
            self.page_id = PageId::INVALID;
            return Some(Err(e));
        }
        Some(Ok(entry))
    }
}
