//! Page-based B+ tree index.
//!
//! All node access goes through the buffer pool: every operation fetches
//! pages by id, mutates them in place under the frame's write latch, and
//! unpins exactly once via the RAII guards. Parent pointers live in the
//! page headers and are maintained across every split and merge that moves
//! children between pages.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use crate::btree::iterator::IndexIterator;
use crate::btree::page::{InternalPage, LeafPage};
use crate::btree::types::{ceil_half, BPlusTreePage};
use crate::header_page::{init_header_page, HeaderPage};
use crate::key::IndexKey;
use cairn_buffer::{BufferPoolManager, PageWriteGuard};
use cairn_common::page::PageId;
use cairn_common::types::RecordId;
use cairn_common::{CairnError, Result};

/// B+ tree index supporting point lookup, unique-key insertion, deletion
/// with redistribution and merging, and ordered iteration.
pub struct BPlusTree<K: IndexKey> {
    /// Name under which the root is registered on the header page.
    index_name: String,
    /// Buffer pool all page access goes through.
    bpm: Arc<BufferPoolManager>,
    /// Current root page, `PageId::INVALID` while the tree is empty.
    root_page_id: AtomicU32,
    /// Leaf capacity; a leaf splits upon reaching it.
    leaf_max_size: u32,
    /// Internal capacity; an internal node splits upon exceeding it.
    internal_max_size: u32,
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Creates a tree handle, restoring the root from the header page when
    /// the index is already registered there. Claims the header page on a
    /// fresh database.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        // A leaf may briefly hold one entry past its capacity before the
        // split lands; internal nodes likewise.
        assert!(leaf_max_size >= 2, "leaf_max_size must be at least 2");
        assert!(
            leaf_max_size < LeafPage::<K>::capacity(),
            "leaf_max_size {} exceeds page capacity {}",
            leaf_max_size,
            LeafPage::<K>::capacity()
        );
        assert!(internal_max_size >= 3, "internal_max_size must be at least 3");
        assert!(
            internal_max_size < InternalPage::<K>::capacity(),
            "internal_max_size {} exceeds page capacity {}",
            internal_max_size,
            InternalPage::<K>::capacity()
        );

        let index_name = index_name.into();
        init_header_page(&bpm)?;

        let root = {
            let guard = bpm.read_page(PageId::HEADER)?;
            let data = guard.data();
            HeaderPage::find_record(&**data, &index_name).unwrap_or(PageId::INVALID)
        };

        Ok(Self {
            index_name,
            bpm,
            root_page_id: AtomicU32::new(root.0),
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    /// Creates a tree handle with capacities derived from the page size.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
    ) -> Result<Self> {
        Self::new(
            index_name,
            bpm,
            LeafPage::<K>::capacity() - 1,
            InternalPage::<K>::capacity() - 1,
        )
    }

    /// Returns the page id of the root, `PageId::INVALID` when empty.
    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    fn set_root_page_id(&self, page_id: PageId) {
        self.root_page_id.store(page_id.0, Ordering::Release);
    }

    /// Returns true if the tree holds no pages.
    pub fn is_empty(&self) -> bool {
        self.root_page_id() == PageId::INVALID
    }

    /// Records the current root on the header page. `insert_record`
    /// registers the index; otherwise the existing record is updated.
    fn update_root_page_id(&self, insert_record: bool) -> Result<()> {
        let root = self.root_page_id();
        let guard = self.bpm.write_page(PageId::HEADER)?;
        let mut data = guard.data_mut();
        let ok = if insert_record {
            HeaderPage::insert_record(&mut **data, &self.index_name, root)
        } else {
            HeaderPage::update_record(&mut **data, &self.index_name, root)
        };
        guard.set_dirty();
        if !ok {
            return if insert_record {
                Err(CairnError::HeaderFull)
            } else {
                Err(CairnError::TreeCorrupted(format!(
                    "index {} missing from header page",
                    self.index_name
                )))
            };
        }
        Ok(())
    }

    /// Descends to the leaf that covers `key`. At most one page is pinned
    /// at a time: each internal page is unpinned before its child is
    /// fetched.
    fn find_leaf(&self, key: &K) -> Result<PageId> {
        let mut page_id = self.root_page_id();
        loop {
            let child = {
                let guard = self.bpm.read_page(page_id)?;
                let data = guard.data();
                if BPlusTreePage::is_leaf(&**data) {
                    return Ok(page_id);
                }
                InternalPage::<K>::lookup_child(&**data, key)
            };
            page_id = child;
        }
    }

    /// Descends along the leftmost children to the first leaf.
    fn find_leftmost_leaf(&self) -> Result<PageId> {
        let mut page_id = self.root_page_id();
        loop {
            let child = {
                let guard = self.bpm.read_page(page_id)?;
                let data = guard.data();
                if BPlusTreePage::is_leaf(&**data) {
                    return Ok(page_id);
                }
                InternalPage::<K>::child_at(&**data, 0)
            };
            page_id = child;
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup. Returns every value stored under `key` (zero or one,
    /// as keys are unique).
    pub fn get_value(&self, key: &K) -> Result<Vec<RecordId>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let leaf_pid = self.find_leaf(key)?;
        let guard = self.bpm.read_page(leaf_pid)?;
        let data = guard.data();
        Ok(LeafPage::<K>::lookup(&**data, key).into_iter().collect())
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts a key-value pair. Returns false without mutation when the
    /// key already exists; the tree enforces unique keys.
    pub fn insert(&self, key: K, value: RecordId) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let leaf_pid = self.find_leaf(&key)?;
        let leaf_guard = self.bpm.write_page(leaf_pid)?;
        let needs_split = {
            let mut data = leaf_guard.data_mut();
            if LeafPage::<K>::find(&**data, &key).is_ok() {
                return Ok(false);
            }
            LeafPage::<K>::insert(&mut **data, &key, value)?;
            leaf_guard.set_dirty();
            BPlusTreePage::size(&**data) >= self.leaf_max_size
        };

        if needs_split {
            self.split_leaf(&leaf_guard)?;
        }
        Ok(true)
    }

    /// Allocates the first leaf as the root and registers the index on the
    /// header page.
    fn start_new_tree(&self, key: K, value: RecordId) -> Result<()> {
        let (page_id, guard) = self.bpm.new_page_write()?;
        {
            let mut data = guard.data_mut();
            LeafPage::<K>::init(&mut **data, page_id, PageId::INVALID, self.leaf_max_size);
            LeafPage::<K>::insert(&mut **data, &key, value)?;
            guard.set_dirty();
        }
        self.set_root_page_id(page_id);
        self.update_root_page_id(true)
    }

    /// Splits a full leaf: the new right sibling takes the upper half of
    /// the entries and is spliced into the chain (it inherits the old
    /// leaf's next pointer; the old leaf then points at it).
    fn split_leaf(&self, leaf_guard: &PageWriteGuard<'_>) -> Result<()> {
        let (new_pid, new_guard) = self.bpm.new_page_write()?;
        let split_key = {
            let mut old = leaf_guard.data_mut();
            let mut new = new_guard.data_mut();

            let parent = BPlusTreePage::parent_page_id(&**old);
            LeafPage::<K>::init(&mut **new, new_pid, parent, self.leaf_max_size);

            let total = BPlusTreePage::size(&**old) as usize;
            let mid = ceil_half(self.leaf_max_size) as usize;
            LeafPage::<K>::append_from(&mut **new, &**old, mid, total - mid);
            BPlusTreePage::set_size(&mut **old, mid as u32);

            let old_next = LeafPage::<K>::next_page_id(&**old);
            LeafPage::<K>::set_next_page_id(&mut **new, old_next);
            LeafPage::<K>::set_next_page_id(&mut **old, new_pid);

            leaf_guard.set_dirty();
            new_guard.set_dirty();
            LeafPage::<K>::key_at(&**new, 0)
        };

        self.insert_in_parent(leaf_guard, &new_guard, split_key)
    }

    /// Links a freshly split-off right page under the left page's parent,
    /// creating a new root when the left page was the root and splitting
    /// the parent when it overflows.
    fn insert_in_parent(
        &self,
        left: &PageWriteGuard<'_>,
        right: &PageWriteGuard<'_>,
        key: K,
    ) -> Result<()> {
        let left_pid = left.page_id();
        let right_pid = right.page_id();
        let parent_pid = {
            let data = left.data();
            BPlusTreePage::parent_page_id(&**data)
        };

        if parent_pid == PageId::INVALID {
            // The left page was the root: grow the tree by one level.
            let (root_pid, root_guard) = self.bpm.new_page_write()?;
            {
                let mut root = root_guard.data_mut();
                InternalPage::<K>::init(
                    &mut **root,
                    root_pid,
                    PageId::INVALID,
                    self.internal_max_size,
                );
                InternalPage::<K>::populate_new_root(&mut **root, left_pid, &key, right_pid);
                root_guard.set_dirty();
            }
            {
                let mut data = left.data_mut();
                BPlusTreePage::set_parent_page_id(&mut **data, root_pid);
                left.set_dirty();
            }
            {
                let mut data = right.data_mut();
                BPlusTreePage::set_parent_page_id(&mut **data, root_pid);
                right.set_dirty();
            }
            self.set_root_page_id(root_pid);
            return self.update_root_page_id(false);
        }

        let parent_guard = self.bpm.write_page(parent_pid)?;
        let overflow = {
            let mut pdata = parent_guard.data_mut();
            let idx = InternalPage::<K>::child_index_of(&**pdata, left_pid).ok_or_else(|| {
                CairnError::TreeCorrupted(format!("page {left_pid} missing from its parent"))
            })?;
            InternalPage::<K>::insert_entry_at(&mut **pdata, idx + 1, &key, right_pid);
            parent_guard.set_dirty();
            {
                let mut rdata = right.data_mut();
                BPlusTreePage::set_parent_page_id(&mut **rdata, parent_pid);
                right.set_dirty();
            }
            BPlusTreePage::size(&**pdata) > self.internal_max_size
        };

        if overflow {
            self.split_internal(&parent_guard)?;
        }
        Ok(())
    }

    /// Splits an overflowing internal node, repointing every migrated
    /// child's parent at the new sibling, and recurses into the parent
    /// with the middle key.
    fn split_internal(&self, node_guard: &PageWriteGuard<'_>) -> Result<()> {
        let (new_pid, new_guard) = self.bpm.new_page_write()?;
        let (promoted_key, moved_children) = {
            let mut old = node_guard.data_mut();
            let mut new = new_guard.data_mut();

            let parent = BPlusTreePage::parent_page_id(&**old);
            InternalPage::<K>::init(&mut **new, new_pid, parent, self.internal_max_size);

            // The node holds internal_max_size + 1 entries; the middle key
            // moves up and its child leads the new sibling. Keeping
            // ceil_half(max) entries on the left leaves both halves at or
            // above the minimum occupancy.
            let total = BPlusTreePage::size(&**old) as usize;
            let middle = ceil_half(self.internal_max_size) as usize;
            let promoted_key = InternalPage::<K>::key_at(&**old, middle);
            let count = total - middle;
            InternalPage::<K>::append_from(&mut **new, &**old, middle, count);
            BPlusTreePage::set_size(&mut **old, middle as u32);

            node_guard.set_dirty();
            new_guard.set_dirty();

            let moved: Vec<PageId> = (0..count)
                .map(|i| InternalPage::<K>::child_at(&**new, i))
                .collect();
            (promoted_key, moved)
        };

        for child_pid in moved_children {
            let child_guard = self.bpm.write_page(child_pid)?;
            let mut cdata = child_guard.data_mut();
            BPlusTreePage::set_parent_page_id(&mut **cdata, new_pid);
            child_guard.set_dirty();
        }

        self.insert_in_parent(node_guard, &new_guard, promoted_key)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Deletes the entry for `key`. A silent no-op when the key is absent.
    pub fn remove(&self, key: &K) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let leaf_pid = self.find_leaf(key)?;
        let leaf_guard = self.bpm.write_page(leaf_pid)?;
        let underflow = {
            let mut data = leaf_guard.data_mut();
            if !LeafPage::<K>::remove(&mut **data, key) {
                return Ok(());
            }
            leaf_guard.set_dirty();
            // The root is permitted to fall below the minimum.
            !BPlusTreePage::is_root(&**data)
                && BPlusTreePage::size(&**data) < ceil_half(self.leaf_max_size)
        };

        if underflow {
            self.rebalance_leaf(leaf_guard)?;
        }
        Ok(())
    }

    /// Fixes an underfull leaf by redistributing from or merging with a
    /// sibling, preferring the right sibling.
    fn rebalance_leaf(&self, leaf_guard: PageWriteGuard<'_>) -> Result<()> {
        let leaf_pid = leaf_guard.page_id();
        let parent_pid = {
            let data = leaf_guard.data();
            BPlusTreePage::parent_page_id(&**data)
        };
        let parent_guard = self.bpm.write_page(parent_pid)?;
        let (idx, parent_size) = {
            let pdata = parent_guard.data();
            let idx = InternalPage::<K>::child_index_of(&**pdata, leaf_pid).ok_or_else(|| {
                CairnError::TreeCorrupted(format!("leaf {leaf_pid} missing from its parent"))
            })?;
            (idx, BPlusTreePage::size(&**pdata) as usize)
        };

        if idx + 1 < parent_size {
            // Right sibling: this leaf is the left page of the pair.
            let sib_pid = {
                let pdata = parent_guard.data();
                InternalPage::<K>::child_at(&**pdata, idx + 1)
            };
            let sib_guard = self.bpm.write_page(sib_pid)?;
            let merged = {
                let mut ldata = leaf_guard.data_mut();
                let mut sdata = sib_guard.data_mut();
                let lsize = BPlusTreePage::size(&**ldata) as usize;
                let ssize = BPlusTreePage::size(&**sdata) as usize;

                if (lsize + ssize) as u32 <= self.leaf_max_size {
                    LeafPage::<K>::append_from(&mut **ldata, &**sdata, 0, ssize);
                    let next = LeafPage::<K>::next_page_id(&**sdata);
                    LeafPage::<K>::set_next_page_id(&mut **ldata, next);
                    leaf_guard.set_dirty();
                    true
                } else {
                    // Move the sibling's first entry across and refresh the
                    // separator to the sibling's new first key.
                    let moved_key = LeafPage::<K>::key_at(&**sdata, 0);
                    let moved_value = LeafPage::<K>::value_at(&**sdata, 0);
                    LeafPage::<K>::insert_entry_at(&mut **ldata, lsize, &moved_key, moved_value);
                    LeafPage::<K>::remove_entry_at(&mut **sdata, 0);

                    let mut pdata = parent_guard.data_mut();
                    let new_separator = LeafPage::<K>::key_at(&**sdata, 0);
                    InternalPage::<K>::set_key_at(&mut **pdata, idx + 1, &new_separator);

                    leaf_guard.set_dirty();
                    sib_guard.set_dirty();
                    parent_guard.set_dirty();
                    false
                }
            };

            if merged {
                {
                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::remove_entry_at(&mut **pdata, idx + 1);
                    parent_guard.set_dirty();
                }
                drop(sib_guard);
                drop(leaf_guard);
                self.bpm.delete_page(sib_pid)?;
                self.rebalance_internal_if_needed(parent_guard)?;
            }
        } else {
            // No right sibling: merge into or borrow from the left one.
            let sib_pid = {
                let pdata = parent_guard.data();
                InternalPage::<K>::child_at(&**pdata, idx - 1)
            };
            let sib_guard = self.bpm.write_page(sib_pid)?;
            let merged = {
                let mut ldata = leaf_guard.data_mut();
                let mut sdata = sib_guard.data_mut();
                let lsize = BPlusTreePage::size(&**ldata) as usize;
                let ssize = BPlusTreePage::size(&**sdata) as usize;

                if (lsize + ssize) as u32 <= self.leaf_max_size {
                    // Concatenate into the left page of the pair.
                    LeafPage::<K>::append_from(&mut **sdata, &**ldata, 0, lsize);
                    let next = LeafPage::<K>::next_page_id(&**ldata);
                    LeafPage::<K>::set_next_page_id(&mut **sdata, next);
                    sib_guard.set_dirty();
                    true
                } else {
                    // Move the sibling's last entry across and refresh the
                    // separator to this leaf's new first key.
                    let moved_key = LeafPage::<K>::key_at(&**sdata, ssize - 1);
                    let moved_value = LeafPage::<K>::value_at(&**sdata, ssize - 1);
                    LeafPage::<K>::remove_entry_at(&mut **sdata, ssize - 1);
                    LeafPage::<K>::insert_entry_at(&mut **ldata, 0, &moved_key, moved_value);

                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::set_key_at(&mut **pdata, idx, &moved_key);

                    leaf_guard.set_dirty();
                    sib_guard.set_dirty();
                    parent_guard.set_dirty();
                    false
                }
            };

            if merged {
                {
                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::remove_entry_at(&mut **pdata, idx);
                    parent_guard.set_dirty();
                }
                drop(sib_guard);
                drop(leaf_guard);
                self.bpm.delete_page(leaf_pid)?;
                self.rebalance_internal_if_needed(parent_guard)?;
            }
        }
        Ok(())
    }

    /// Applies the root-collapse and minimum-occupancy rules to an internal
    /// node after one of its entries was removed.
    fn rebalance_internal_if_needed(&self, node_guard: PageWriteGuard<'_>) -> Result<()> {
        let (is_root, size) = {
            let data = node_guard.data();
            (
                BPlusTreePage::is_root(&**data),
                BPlusTreePage::size(&**data),
            )
        };

        if is_root {
            if size == 1 {
                self.collapse_root(node_guard)?;
            }
            return Ok(());
        }
        if size >= ceil_half(self.internal_max_size) {
            return Ok(());
        }
        self.rebalance_internal(node_guard)
    }

    /// An internal root with a single child hands the root role to that
    /// child and is freed.
    fn collapse_root(&self, root_guard: PageWriteGuard<'_>) -> Result<()> {
        let old_root_pid = root_guard.page_id();
        let child_pid = {
            let data = root_guard.data();
            InternalPage::<K>::child_at(&**data, 0)
        };
        {
            let child_guard = self.bpm.write_page(child_pid)?;
            let mut cdata = child_guard.data_mut();
            BPlusTreePage::set_parent_page_id(&mut **cdata, PageId::INVALID);
            child_guard.set_dirty();
        }
        self.set_root_page_id(child_pid);
        self.update_root_page_id(false)?;
        drop(root_guard);
        self.bpm.delete_page(old_root_pid)?;
        Ok(())
    }

    /// Fixes an underfull internal node. Merging pulls the parent
    /// separator down into the merged node; redistribution rotates one
    /// child through the separator. Moved children get their parent
    /// pointers repointed.
    fn rebalance_internal(&self, node_guard: PageWriteGuard<'_>) -> Result<()> {
        let node_pid = node_guard.page_id();
        let parent_pid = {
            let data = node_guard.data();
            BPlusTreePage::parent_page_id(&**data)
        };
        let parent_guard = self.bpm.write_page(parent_pid)?;
        let (idx, parent_size) = {
            let pdata = parent_guard.data();
            let idx = InternalPage::<K>::child_index_of(&**pdata, node_pid).ok_or_else(|| {
                CairnError::TreeCorrupted(format!("node {node_pid} missing from its parent"))
            })?;
            (idx, BPlusTreePage::size(&**pdata) as usize)
        };

        if idx + 1 < parent_size {
            // Right sibling: this node is the left page of the pair.
            let sib_pid = {
                let pdata = parent_guard.data();
                InternalPage::<K>::child_at(&**pdata, idx + 1)
            };
            let sib_guard = self.bpm.write_page(sib_pid)?;
            let separator = {
                let pdata = parent_guard.data();
                InternalPage::<K>::key_at(&**pdata, idx + 1)
            };

            let (merged, moved_children) = {
                let mut ndata = node_guard.data_mut();
                let mut sdata = sib_guard.data_mut();
                let nsize = BPlusTreePage::size(&**ndata) as usize;
                let ssize = BPlusTreePage::size(&**sdata) as usize;

                if (nsize + ssize) as u32 <= self.internal_max_size {
                    // The separator comes down with the sibling's first
                    // child; the rest follow.
                    let first_child = InternalPage::<K>::child_at(&**sdata, 0);
                    InternalPage::<K>::insert_entry_at(
                        &mut **ndata,
                        nsize,
                        &separator,
                        first_child,
                    );
                    InternalPage::<K>::append_from(&mut **ndata, &**sdata, 1, ssize - 1);
                    node_guard.set_dirty();

                    let moved: Vec<PageId> = (0..ssize)
                        .map(|i| InternalPage::<K>::child_at(&**ndata, nsize + i))
                        .collect();
                    (true, moved)
                } else {
                    // Rotate the sibling's first child through the parent.
                    let first_child = InternalPage::<K>::child_at(&**sdata, 0);
                    InternalPage::<K>::insert_entry_at(
                        &mut **ndata,
                        nsize,
                        &separator,
                        first_child,
                    );
                    let new_separator = InternalPage::<K>::key_at(&**sdata, 1);
                    InternalPage::<K>::remove_entry_at(&mut **sdata, 0);

                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::set_key_at(&mut **pdata, idx + 1, &new_separator);

                    node_guard.set_dirty();
                    sib_guard.set_dirty();
                    parent_guard.set_dirty();
                    (false, vec![first_child])
                }
            };

            for child_pid in moved_children {
                let child_guard = self.bpm.write_page(child_pid)?;
                let mut cdata = child_guard.data_mut();
                BPlusTreePage::set_parent_page_id(&mut **cdata, node_pid);
                child_guard.set_dirty();
            }

            if merged {
                {
                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::remove_entry_at(&mut **pdata, idx + 1);
                    parent_guard.set_dirty();
                }
                drop(sib_guard);
                drop(node_guard);
                self.bpm.delete_page(sib_pid)?;
                self.rebalance_internal_if_needed(parent_guard)?;
            }
        } else {
            // No right sibling: merge into or borrow from the left one.
            let sib_pid = {
                let pdata = parent_guard.data();
                InternalPage::<K>::child_at(&**pdata, idx - 1)
            };
            let sib_guard = self.bpm.write_page(sib_pid)?;
            let separator = {
                let pdata = parent_guard.data();
                InternalPage::<K>::key_at(&**pdata, idx)
            };

            let (merged, moved_children) = {
                let mut ndata = node_guard.data_mut();
                let mut sdata = sib_guard.data_mut();
                let nsize = BPlusTreePage::size(&**ndata) as usize;
                let ssize = BPlusTreePage::size(&**sdata) as usize;

                if (nsize + ssize) as u32 <= self.internal_max_size {
                    // Concatenate into the left page: separator first, with
                    // this node's leading child, then the rest.
                    let first_child = InternalPage::<K>::child_at(&**ndata, 0);
                    InternalPage::<K>::insert_entry_at(
                        &mut **sdata,
                        ssize,
                        &separator,
                        first_child,
                    );
                    InternalPage::<K>::append_from(&mut **sdata, &**ndata, 1, nsize - 1);
                    sib_guard.set_dirty();

                    let moved: Vec<PageId> = (0..nsize)
                        .map(|i| InternalPage::<K>::child_at(&**sdata, ssize + i))
                        .collect();
                    (true, moved)
                } else {
                    // Rotate the sibling's last child through the parent.
                    let moved_key = InternalPage::<K>::key_at(&**sdata, ssize - 1);
                    let moved_child = InternalPage::<K>::child_at(&**sdata, ssize - 1);
                    InternalPage::<K>::remove_entry_at(&mut **sdata, ssize - 1);

                    InternalPage::<K>::insert_entry_at(
                        &mut **ndata,
                        0,
                        &K::default(),
                        moved_child,
                    );
                    InternalPage::<K>::set_key_at(&mut **ndata, 1, &separator);

                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::set_key_at(&mut **pdata, idx, &moved_key);

                    node_guard.set_dirty();
                    sib_guard.set_dirty();
                    parent_guard.set_dirty();
                    (false, vec![moved_child])
                }
            };

            let repoint_to = if merged { sib_pid } else { node_pid };
            for child_pid in moved_children {
                let child_guard = self.bpm.write_page(child_pid)?;
                let mut cdata = child_guard.data_mut();
                BPlusTreePage::set_parent_page_id(&mut **cdata, repoint_to);
                child_guard.set_dirty();
            }

            if merged {
                {
                    let mut pdata = parent_guard.data_mut();
                    InternalPage::<K>::remove_entry_at(&mut **pdata, idx);
                    parent_guard.set_dirty();
                }
                drop(sib_guard);
                drop(node_guard);
                self.bpm.delete_page(node_pid)?;
                self.rebalance_internal_if_needed(parent_guard)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Cursor positioned at the first entry of the leftmost leaf.
    pub fn begin(&self) -> Result<IndexIterator<K>> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let leaf_pid = self.find_leftmost_leaf()?;
        {
            let guard = self.bpm.read_page(leaf_pid)?;
            let data = guard.data();
            if BPlusTreePage::size(&**data) == 0 {
                return Ok(self.end());
            }
        }
        Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf_pid, 0))
    }

    /// Cursor positioned at the exact match for `key`, or the end sentinel
    /// when the key is absent.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K>> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let leaf_pid = self.find_leaf(key)?;
        let guard = self.bpm.read_page(leaf_pid)?;
        let data = guard.data();
        match LeafPage::<K>::find(&**data, key) {
            Ok(offset) => Ok(IndexIterator::new(
                Arc::clone(&self.bpm),
                leaf_pid,
                offset,
            )),
            Err(_) => Ok(self.end()),
        }
    }

    /// The end sentinel.
    pub fn end(&self) -> IndexIterator<K> {
        IndexIterator::new(Arc::clone(&self.bpm), PageId::INVALID, 0)
    }

    // =========================================================================
    // Debug utilities
    // =========================================================================

    /// Dumps the tree to stdout, one node per line.
    pub fn print(&self) -> Result<()> {
        if self.is_empty() {
            tracing::warn!("printing an empty tree");
            return Ok(());
        }
        let mut out = String::new();
        self.format_page(self.root_page_id(), 0, &mut out)?;
        println!("{out}");
        Ok(())
    }

    fn format_page(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        use std::fmt::Write;

        let (line, children) = {
            let guard = self.bpm.read_page(page_id)?;
            let data = guard.data();
            let size = BPlusTreePage::size(&**data) as usize;
            if BPlusTreePage::is_leaf(&**data) {
                let keys: Vec<String> = (0..size)
                    .map(|i| format!("{:?}", LeafPage::<K>::key_at(&**data, i)))
                    .collect();
                let line = format!(
                    "{}leaf {} parent={} next={} [{}]",
                    "  ".repeat(depth),
                    page_id,
                    BPlusTreePage::parent_page_id(&**data),
                    LeafPage::<K>::next_page_id(&**data),
                    keys.join(",")
                );
                (line, Vec::new())
            } else {
                let keys: Vec<String> = (1..size)
                    .map(|i| format!("{:?}", InternalPage::<K>::key_at(&**data, i)))
                    .collect();
                let line = format!(
                    "{}internal {} parent={} [{}]",
                    "  ".repeat(depth),
                    page_id,
                    BPlusTreePage::parent_page_id(&**data),
                    keys.join(",")
                );
                let children = (0..size)
                    .map(|i| InternalPage::<K>::child_at(&**data, i))
                    .collect();
                (line, children)
            }
        };

        writeln!(out, "{line}").expect("formatting into a String cannot fail");
        for child in children {
            self.format_page(child, depth + 1, out)?;
        }
        Ok(())
    }

    /// Renders the tree as a Graphviz DOT digraph.
    pub fn draw(&self) -> Result<String> {
        if self.is_empty() {
            tracing::warn!("drawing an empty tree");
            return Ok(String::from("digraph G {}\n"));
        }
        let mut out = String::from("digraph G {\n");
        self.draw_page(self.root_page_id(), &mut out)?;
        out.push_str("}\n");
        Ok(out)
    }

    fn draw_page(&self, page_id: PageId, out: &mut String) -> Result<()> {
        use std::fmt::Write;

        let (node, children) = {
            let guard = self.bpm.read_page(page_id)?;
            let data = guard.data();
            let size = BPlusTreePage::size(&**data) as usize;
            if BPlusTreePage::is_leaf(&**data) {
                let keys: Vec<String> = (0..size)
                    .map(|i| format!("{:?}", LeafPage::<K>::key_at(&**data, i)))
                    .collect();
                let mut node = format!(
                    "  leaf_{} [shape=record color=green label=\"{}\"];\n",
                    page_id.0,
                    keys.join("|")
                );
                if LeafPage::<K>::next_page_id(&**data).is_valid() {
                    let next = LeafPage::<K>::next_page_id(&**data);
                    write!(node, "  leaf_{} -> leaf_{};\n", page_id.0, next.0)
                        .expect("formatting into a String cannot fail");
                }
                (node, Vec::new())
            } else {
                let keys: Vec<String> = (1..size)
                    .map(|i| format!("{:?}", InternalPage::<K>::key_at(&**data, i)))
                    .collect();
                let node = format!(
                    "  int_{} [shape=record color=pink label=\"{}\"];\n",
                    page_id.0,
                    keys.join("|")
                );
                let children: Vec<PageId> = (0..size)
                    .map(|i| InternalPage::<K>::child_at(&**data, i))
                    .collect();
                (node, children)
            }
        };

        out.push_str(&node);
        for child in children {
            let label = {
                let guard = self.bpm.read_page(child)?;
                let data = guard.data();
                if BPlusTreePage::is_leaf(&**data) {
                    format!("leaf_{}", child.0)
                } else {
                    format!("int_{}", child.0)
                }
            };
            writeln!(out, "  int_{} -> {label};", page_id.0)
                .expect("formatting into a String cannot fail");
            self.draw_page(child, out)?;
        }
        Ok(())
    }
}
