//! Extendible hash table.
//!
//! Generic associative container with amortised O(1) lookup, insert, and
//! remove. The directory doubles only when a full bucket at maximum local
//! depth must split; buckets are shared across directory slots until a
//! split forces them apart. The buffer pool uses an instance of this table
//! as its page table (PageId -> FrameId).

use parking_lot::{Mutex, RwLock};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Hasher used for directory indexing.
///
/// Integer keys hash to themselves so that directory growth follows the
/// low bits of the key. Other byte streams are folded with a rotate-xor.
struct IndexHasher {
    state: u64,
}

impl Hasher for IndexHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state = self.state.rotate_left(5) ^ (b as u64);
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.state = v as u64;
    }
    fn write_u16(&mut self, v: u16) {
        self.state = v as u64;
    }
    fn write_u32(&mut self, v: u32) {
        self.state = v as u64;
    }
    fn write_u64(&mut self, v: u64) {
        self.state = v;
    }
    fn write_usize(&mut self, v: usize) {
        self.state = v as u64;
    }
    fn write_i8(&mut self, v: i8) {
        self.state = v as u8 as u64;
    }
    fn write_i16(&mut self, v: i16) {
        self.state = v as u16 as u64;
    }
    fn write_i32(&mut self, v: i32) {
        self.state = v as u32 as u64;
    }
    fn write_i64(&mut self, v: i64) {
        self.state = v as u64;
    }
    fn write_isize(&mut self, v: isize) {
        self.state = v as u64;
    }
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = IndexHasher { state: 0 };
    key.hash(&mut hasher);
    hasher.finish()
}

/// A bucket holding up to `bucket_size` key-value entries.
struct Bucket<K, V> {
    /// Number of hash bits this bucket discriminates.
    depth: u32,
    items: Vec<(K, V)>,
}

impl<K: Eq + Copy, V: Clone> Bucket<K, V> {
    fn new(depth: u32, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }
}

/// The directory: `2^global_depth` slots, each referencing a bucket.
struct Directory<K, V> {
    global_depth: u32,
    num_buckets: usize,
    slots: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

/// Extendible hash table.
///
/// A single reader-writer latch protects the directory; bucket latches
/// nest inside it. Lookups and in-place inserts run under the shared mode;
/// splits and removes take the exclusive mode.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Copy,
    V: Clone,
{
    /// Creates a table whose buckets hold up to `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            dir: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                slots: vec![Arc::new(Mutex::new(Bucket::new(0, bucket_size)))],
            }),
        }
    }

    fn index_of(key: &K, global_depth: u32) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (hash_key(key) & mask) as usize
    }

    /// Returns the number of hash bits the directory indexes with.
    pub fn global_depth(&self) -> u32 {
        self.dir.read().global_depth
    }

    /// Returns the local depth of the bucket referenced by directory slot `i`.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let dir = self.dir.read();
        let depth = dir.slots[dir_index].lock().depth;
        depth
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.dir.read().num_buckets
    }

    /// Looks up the value associated with `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.read();
        let idx = Self::index_of(key, dir.global_depth);
        let bucket = dir.slots[idx].lock();
        bucket.find(key)
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts a key-value pair, overwriting the value if the key exists.
    pub fn insert(&self, key: K, value: V) {
        // Fast path under the shared directory latch: overwrite or append
        // into a bucket with spare capacity.
        {
            let dir = self.dir.read();
            let idx = Self::index_of(&key, dir.global_depth);
            let mut bucket = dir.slots[idx].lock();

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }
        }

        // Slow path: the target bucket was full. Split under the exclusive
        // latch, retrying until the insert lands (a split may leave all
        // entries on one side).
        let mut dir = self.dir.write();
        loop {
            let idx = Self::index_of(&key, dir.global_depth);
            let bucket_arc = Arc::clone(&dir.slots[idx]);
            let mut bucket = bucket_arc.lock();

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            let local_depth = bucket.depth;
            if local_depth == dir.global_depth {
                // Double the directory: each new slot aliases the slot that
                // differs only in the new high bit.
                let old_len = dir.slots.len();
                for i in 0..old_len {
                    let alias = Arc::clone(&dir.slots[i]);
                    dir.slots.push(alias);
                }
                dir.global_depth += 1;
            }

            // Allocate the split image one bit deeper and repoint every
            // directory slot whose low local_depth+1 bits match its
            // canonical index.
            let canonical = idx & ((1 << local_depth) - 1);
            let new_canonical = canonical | (1 << local_depth);
            let new_bucket = Arc::new(Mutex::new(Bucket::new(
                local_depth + 1,
                self.bucket_size,
            )));
            bucket.depth = local_depth + 1;

            let mask = (1usize << (local_depth + 1)) - 1;
            for i in 0..dir.slots.len() {
                if i & mask == new_canonical {
                    dir.slots[i] = Arc::clone(&new_bucket);
                }
            }
            dir.num_buckets += 1;

            // Rehash the old bucket's entries against the deeper mask.
            let mut moved = Vec::new();
            bucket.items.retain(|(k, v)| {
                if (hash_key(k) as usize) & mask == new_canonical {
                    moved.push((*k, v.clone()));
                    false
                } else {
                    true
                }
            });
            drop(bucket);
            if !moved.is_empty() {
                new_bucket.lock().items.extend(moved);
            }
        }
    }

    /// Removes a key. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.write();
        let idx = Self::index_of(key, dir.global_depth);
        let mut bucket = dir.slots[idx].lock();
        bucket.remove(key)
    }

    /// Returns the total number of entries across all buckets.
    pub fn len(&self) -> usize {
        let dir = self.dir.read();
        let mut count = 0;
        for (i, slot) in dir.slots.iter().enumerate() {
            let bucket = slot.lock();
            // A bucket of depth d is aliased by slots differing only in
            // bits >= d; exactly one of those slots is below 2^d. Count
            // each bucket there.
            if i < (1usize << bucket.depth) {
                count += bucket.items.len();
            }
        }
        count
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
