//! The tree engine: the component that actually implements search, split,
//! range scans, and the rest of the bonsai tree's public contract. Every
//! public mutator goes through the full concurrency envelope: the
//! partitioned file lock (shared for readers, exclusive for writers), the
//! atomic-operation manager's component read lock, and an atomic
//! operation wrapping the mutation itself.

use std::sync::Arc;

use log::debug;

use crate::allocator::{self, read_bucket_at, write_bucket_at};
use crate::bucket::{Bucket, BucketEntry, UpdateResult};
use crate::cache::PageCache;
use crate::codec::Serializer;
use crate::common::{BonsaiConfig, BucketPointer, FileId};
use crate::errors::{BonsaiError, Result};
use crate::lock::LockManager;
use crate::wal::{self, AtomicOperationManager};

const ATOMIC_OPS_COMPONENT: &str = "bonsai-tree";

/// Outcome of a descent to a leaf: the item index at the leaf (or its
/// negated insertion point) plus the path of bucket pointers visited
/// (root first), and, for every branch level on that path, the slot at
/// which a promoted separator would be inserted if the child directly
/// below it were to split.
struct BucketSearchResult {
    item_index: i32,
    path: Vec<BucketPointer>,
    child_slots: Vec<usize>,
}

fn find_bucket(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    root: BucketPointer,
    key: &[u8],
) -> Result<BucketSearchResult> {
    let mut path = Vec::new();
    let mut child_slots = Vec::new();
    let mut current = root;

    loop {
        path.push(current);
        let bucket = read_bucket_at(cache, file_id, current, config.max_bucket_size_bytes)?;
        let idx = bucket.find(key);

        if bucket.is_leaf() {
            return Ok(BucketSearchResult { item_index: idx, path, child_slots });
        }

        let (child, slot) = if idx >= 0 {
            let i = idx as usize;
            (bucket.get_entry(i).right_child(), i + 1)
        } else {
            let ip = (-idx - 1) as usize;
            if ip >= bucket.size() {
                (bucket.get_entry(bucket.size() - 1).right_child(), bucket.size())
            } else {
                let entry = bucket.get_entry(ip);
                if key < entry.key() {
                    (entry.left_child(), ip)
                } else {
                    (entry.right_child(), ip + 1)
                }
            }
        };
        child_slots.push(slot);
        current = child;
    }
}

fn relink_right_sibling(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    right_sibling: BucketPointer,
    new_left_sibling: BucketPointer,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    if !right_sibling.is_valid() {
        return Ok(());
    }
    let mut b = read_bucket_at(cache, file_id, right_sibling, config.max_bucket_size_bytes)?;
    b.set_left_sibling(new_left_sibling);
    write_bucket_at(cache, file_id, right_sibling, &b, config.max_bucket_size_bytes, wal)
}

/// Split `bucket` (currently stored at `ptr`, not yet holding `entry`) and
/// place `entry` into whichever half it belongs in. Returns the pointer
/// to the newly allocated sibling and the separator key to promote.
fn split_non_root(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    ptr: BucketPointer,
    mut bucket: Bucket,
    index: usize,
    entry: BucketEntry,
    wal: &dyn AtomicOperationManager,
) -> Result<(BucketPointer, Vec<u8>)> {
    let split_at = bucket.size() >> 1;
    let separation_key = bucket.get_key(split_at).to_vec();
    let is_leaf = bucket.is_leaf();
    let new_ptr = allocator::allocate_bucket(cache, file_id, config, wal)?;

    let all_entries: Vec<BucketEntry> = bucket.entries().to_vec();
    let (left_entries, right_entries, new_index): (Vec<BucketEntry>, Vec<BucketEntry>, usize) = if is_leaf {
        let left = all_entries[..split_at].to_vec();
        let right = all_entries[split_at..].to_vec();
        let ni = if entry.key() < separation_key.as_slice() {
            index
        } else {
            index - split_at
        };
        (left, right, ni)
    } else {
        let left = all_entries[..split_at].to_vec();
        let right = all_entries[split_at + 1..].to_vec();
        let ni = if entry.key() < separation_key.as_slice() {
            index
        } else {
            index - split_at - 1
        };
        (left, right, ni)
    };

    let insert_into_left = entry.key() < separation_key.as_slice();

    let mut new_bucket = if is_leaf {
        Bucket::new_leaf(bucket.key_serializer_id(), bucket.value_serializer_id())
    } else {
        Bucket::new_branch(bucket.key_serializer_id(), bucket.value_serializer_id())
    };
    new_bucket.add_all(right_entries);
    bucket.add_all(left_entries);

    if is_leaf {
        new_bucket.set_left_sibling(ptr);
        new_bucket.set_right_sibling(bucket.get_right_sibling());
        relink_right_sibling(cache, file_id, config, new_bucket.get_right_sibling(), new_ptr, wal)?;
        bucket.set_right_sibling(new_ptr);
    }

    if insert_into_left {
        if !bucket.add_entry(new_index, entry, true, config.max_bucket_size_bytes) {
            return Err(BonsaiError::Usage(
                "entry does not fit into either half after split; max_bucket_size_bytes is too small".into(),
            ));
        }
    } else if !new_bucket.add_entry(new_index, entry, true, config.max_bucket_size_bytes) {
        return Err(BonsaiError::Usage(
            "entry does not fit into either half after split; max_bucket_size_bytes is too small".into(),
        ));
    }

    write_bucket_at(cache, file_id, ptr, &bucket, config.max_bucket_size_bytes, wal)?;
    write_bucket_at(cache, file_id, new_ptr, &new_bucket, config.max_bucket_size_bytes, wal)?;

    Ok((new_ptr, separation_key))
}

/// Root split: the root's address must stay stable, so two *new* buckets
/// are allocated and the root is rewritten in place as a depth-1 branch
/// with a single entry pointing at them.
fn split_root(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    root_ptr: BucketPointer,
    mut root_bucket: Bucket,
    index: usize,
    entry: BucketEntry,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    let split_at = root_bucket.size() >> 1;
    let separation_key = root_bucket.get_key(split_at).to_vec();
    let is_leaf = root_bucket.is_leaf();
    let tree_size = root_bucket.get_tree_size();
    let identifier = root_bucket.get_identifier();

    let left_ptr = allocator::allocate_bucket(cache, file_id, config, wal)?;
    let right_ptr = allocator::allocate_bucket(cache, file_id, config, wal)?;

    let all_entries: Vec<BucketEntry> = root_bucket.entries().to_vec();
    let (left_entries, right_entries, new_index): (Vec<BucketEntry>, Vec<BucketEntry>, usize) = if is_leaf {
        let left = all_entries[..split_at].to_vec();
        let right = all_entries[split_at..].to_vec();
        let ni = if entry.key() < separation_key.as_slice() { index } else { index - split_at };
        (left, right, ni)
    } else {
        let left = all_entries[..split_at].to_vec();
        let right = all_entries[split_at + 1..].to_vec();
        let ni = if entry.key() < separation_key.as_slice() { index } else { index - split_at - 1 };
        (left, right, ni)
    };
    let insert_into_left = entry.key() < separation_key.as_slice();

    let mut left_bucket = if is_leaf {
        Bucket::new_leaf(root_bucket.key_serializer_id(), root_bucket.value_serializer_id())
    } else {
        Bucket::new_branch(root_bucket.key_serializer_id(), root_bucket.value_serializer_id())
    };
    let mut right_bucket = if is_leaf {
        Bucket::new_leaf(root_bucket.key_serializer_id(), root_bucket.value_serializer_id())
    } else {
        Bucket::new_branch(root_bucket.key_serializer_id(), root_bucket.value_serializer_id())
    };
    left_bucket.add_all(left_entries);
    right_bucket.add_all(right_entries);

    if is_leaf {
        left_bucket.set_right_sibling(right_ptr);
        right_bucket.set_left_sibling(left_ptr);
    }

    if insert_into_left {
        if !left_bucket.add_entry(new_index, entry, true, config.max_bucket_size_bytes) {
            return Err(BonsaiError::Usage(
                "entry does not fit into either half of a root split; max_bucket_size_bytes is too small".into(),
            ));
        }
    } else if !right_bucket.add_entry(new_index, entry, true, config.max_bucket_size_bytes) {
        return Err(BonsaiError::Usage(
            "entry does not fit into either half of a root split; max_bucket_size_bytes is too small".into(),
        ));
    }

    write_bucket_at(cache, file_id, left_ptr, &left_bucket, config.max_bucket_size_bytes, wal)?;
    write_bucket_at(cache, file_id, right_ptr, &right_bucket, config.max_bucket_size_bytes, wal)?;

    let mut new_root = Bucket::new_branch(root_bucket.key_serializer_id(), root_bucket.value_serializer_id());
    new_root.set_tree_size(tree_size);
    new_root.set_identifier(identifier);
    new_root.add_all(vec![BucketEntry::Branch {
        left_child: left_ptr,
        right_child: right_ptr,
        key: separation_key,
    }]);
    root_bucket = new_root;
    write_bucket_at(cache, file_id, root_ptr, &root_bucket, config.max_bucket_size_bytes, wal)
}

/// Insert `entry` at `index` within `path[level]`, splitting and
/// recursing toward the root on overflow.
fn insert_with_possible_split(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    path: &[BucketPointer],
    child_slots: &[usize],
    mut level: usize,
    mut index: usize,
    mut entry: BucketEntry,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    loop {
        let ptr = path[level];
        let mut bucket = read_bucket_at(cache, file_id, ptr, config.max_bucket_size_bytes)?;

        if bucket.add_entry(index, entry.clone(), true, config.max_bucket_size_bytes) {
            write_bucket_at(cache, file_id, ptr, &bucket, config.max_bucket_size_bytes, wal)?;
            return Ok(());
        }

        if level == 0 {
            return split_root(cache, file_id, config, ptr, bucket, index, entry, wal);
        }

        let (new_ptr, separation_key) = split_non_root(cache, file_id, config, ptr, bucket, index, entry, wal)?;
        let parent_level = level - 1;
        let parent_slot = child_slots[parent_level];
        entry = BucketEntry::Branch {
            left_child: ptr,
            right_child: new_ptr,
            key: separation_key,
        };
        level = parent_level;
        index = parent_slot;
    }
}

fn set_tree_size(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    root: BucketPointer,
    size: u64,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    let mut root_bucket = read_bucket_at(cache, file_id, root, config.max_bucket_size_bytes)?;
    root_bucket.set_tree_size(size);
    write_bucket_at(cache, file_id, root, &root_bucket, config.max_bucket_size_bytes, wal)
}

/// A single bonsai tree rooted at a fixed, caller-remembered bucket
/// pointer inside `file_id`. `K`/`V` are the logical key/value types; the
/// tree only ever stores their encoded byte form.
pub struct Tree<K, V> {
    cache: Arc<dyn PageCache>,
    wal: Arc<dyn AtomicOperationManager>,
    lock_manager: Arc<LockManager>,
    file_id: FileId,
    config: BonsaiConfig,
    root: BucketPointer,
    key_codec: Arc<dyn Serializer<K>>,
    value_codec: Arc<dyn Serializer<V>>,
    closed: bool,
}

impl<K, V> Tree<K, V> {
    /// First use of `file_id` initializes the system bucket; later trees
    /// in the same file share it.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        cache: Arc<dyn PageCache>,
        wal: Arc<dyn AtomicOperationManager>,
        lock_manager: Arc<LockManager>,
        file_id: FileId,
        config: BonsaiConfig,
        key_codec: Arc<dyn Serializer<K>>,
        value_codec: Arc<dyn Serializer<V>>,
        identifier: u64,
    ) -> Result<Self> {
        let root = wal::run_atomic(wal.as_ref(), |_op| {
            allocator::init_sysbucket(cache.as_ref(), file_id, &config, wal.as_ref())?;
            let root = allocator::allocate_bucket(cache.as_ref(), file_id, &config, wal.as_ref())?;
            let mut root_bucket = Bucket::new_leaf(key_codec.id(), value_codec.id());
            root_bucket.set_identifier(identifier);
            root_bucket.set_tree_size(0);
            write_bucket_at(cache.as_ref(), file_id, root, &root_bucket, config.max_bucket_size_bytes, wal.as_ref())?;
            Ok(root)
        })?;
        debug!("tree: created in file {file_id} at {root:?}");
        Ok(Self {
            cache,
            wal,
            lock_manager,
            file_id,
            config,
            root,
            key_codec,
            value_codec,
            closed: false,
        })
    }

    /// Rehydrate a tree from a previously remembered root pointer. Returns
    /// `Ok(None)` iff the bucket at `root` has been recycled
    /// (`deleted=true`); returns `Unsupported` iff the stored serializer
    /// ids don't match the codecs supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        cache: Arc<dyn PageCache>,
        wal: Arc<dyn AtomicOperationManager>,
        lock_manager: Arc<LockManager>,
        file_id: FileId,
        config: BonsaiConfig,
        root: BucketPointer,
        key_codec: Arc<dyn Serializer<K>>,
        value_codec: Arc<dyn Serializer<V>>,
    ) -> Result<Option<Self>> {
        let root_bucket = read_bucket_at(cache.as_ref(), file_id, root, config.max_bucket_size_bytes)?;
        if root_bucket.is_deleted() {
            return Ok(None);
        }
        if root_bucket.key_serializer_id() != key_codec.id() {
            return Err(BonsaiError::Unsupported(root_bucket.key_serializer_id()));
        }
        if root_bucket.value_serializer_id() != value_codec.id() {
            return Err(BonsaiError::Unsupported(root_bucket.value_serializer_id()));
        }
        Ok(Some(Self {
            cache,
            wal,
            lock_manager,
            file_id,
            config,
            root,
            key_codec,
            value_codec,
            closed: false,
        }))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BonsaiError::Usage("operation on a closed/deleted tree".into()));
        }
        Ok(())
    }

    pub fn get_file_id(&self) -> FileId {
        self.file_id
    }

    pub fn get_root_bucket_pointer(&self) -> BucketPointer {
        self.root
    }

    pub fn get_collection_pointer(&self) -> (FileId, BucketPointer) {
        (self.file_id, self.root)
    }

    pub fn get_key_serializer(&self) -> Arc<dyn Serializer<K>> {
        self.key_codec.clone()
    }

    pub fn get_value_serializer(&self) -> Arc<dyn Serializer<V>> {
        self.value_codec.clone()
    }

    pub fn get_identifier(&self) -> Result<u64> {
        self.ensure_open()?;
        let _r = self.lock_manager.read_guard(self.file_id);
        let root_bucket = read_bucket_at(self.cache.as_ref(), self.file_id, self.root, self.config.max_bucket_size_bytes)?;
        Ok(root_bucket.get_identifier())
    }

    pub fn set_identifier(&mut self, identifier: u64) -> Result<()> {
        self.ensure_open()?;
        let _w = self.lock_manager.write_guard(self.file_id);
        let cache = self.cache.clone();
        let wal = self.wal.clone();
        let file_id = self.file_id;
        let config = self.config;
        let root = self.root;
        wal::run_atomic(wal.as_ref(), |_op| {
            let mut root_bucket = read_bucket_at(cache.as_ref(), file_id, root, config.max_bucket_size_bytes)?;
            root_bucket.set_identifier(identifier);
            write_bucket_at(cache.as_ref(), file_id, root, &root_bucket, config.max_bucket_size_bytes, wal.as_ref())
        })
    }

    pub fn size(&self) -> Result<u64> {
        self.ensure_open()?;
        let _r = self.lock_manager.read_guard(self.file_id);
        let root_bucket = read_bucket_at(self.cache.as_ref(), self.file_id, self.root, self.config.max_bucket_size_bytes)?;
        Ok(root_bucket.get_tree_size())
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        let key_bytes = self.key_codec.encode(key);
        let _r = self.lock_manager.read_guard(self.file_id);
        self.wal.acquire_read_lock(ATOMIC_OPS_COMPONENT);
        let result = find_bucket(self.cache.as_ref(), self.file_id, &self.config, self.root, &key_bytes);
        self.wal.release_read_lock(ATOMIC_OPS_COMPONENT);
        let search = result?;
        if search.item_index < 0 {
            return Ok(None);
        }
        let leaf = read_bucket_at(
            self.cache.as_ref(),
            self.file_id,
            *search.path.last().unwrap(),
            self.config.max_bucket_size_bytes,
        )?;
        let value_bytes = leaf.get_entry(search.item_index as usize).value().to_vec();
        Ok(Some(self.value_codec.decode(&value_bytes)?))
    }

    /// Returns `true` iff the tree was modified (a fresh insert, or an
    /// overwrite with a different value).
    pub fn put(&mut self, key: &K, value: &V) -> Result<bool> {
        self.ensure_open()?;
        let key_bytes = self.key_codec.encode(key);
        let value_bytes = self.value_codec.encode(value);
        let _w = self.lock_manager.write_guard(self.file_id);

        let cache = self.cache.clone();
        let wal = self.wal.clone();
        let file_id = self.file_id;
        let config = self.config;
        let root = self.root;

        wal::run_atomic(wal.as_ref(), |_op| {
            let search = find_bucket(cache.as_ref(), file_id, &config, root, &key_bytes)?;
            let leaf_ptr = *search.path.last().unwrap();
            let mut leaf = read_bucket_at(cache.as_ref(), file_id, leaf_ptr, config.max_bucket_size_bytes)?;

            if search.item_index >= 0 {
                let i = search.item_index as usize;
                match leaf.update_value(i, value_bytes.clone(), config.max_bucket_size_bytes) {
                    UpdateResult::NoChange => Ok(false),
                    UpdateResult::Updated => {
                        write_bucket_at(cache.as_ref(), file_id, leaf_ptr, &leaf, config.max_bucket_size_bytes, wal.as_ref())?;
                        Ok(true)
                    }
                    UpdateResult::Reinsert => {
                        leaf.remove(i);
                        write_bucket_at(cache.as_ref(), file_id, leaf_ptr, &leaf, config.max_bucket_size_bytes, wal.as_ref())?;
                        let entry = BucketEntry::Leaf { key: key_bytes.clone(), value: value_bytes.clone() };
                        insert_with_possible_split(
                            cache.as_ref(),
                            file_id,
                            &config,
                            &search.path,
                            &search.child_slots,
                            search.path.len() - 1,
                            i,
                            entry,
                            wal.as_ref(),
                        )?;
                        Ok(true)
                    }
                }
            } else {
                let insertion_index = (-search.item_index - 1) as usize;
                let entry = BucketEntry::Leaf { key: key_bytes.clone(), value: value_bytes.clone() };
                insert_with_possible_split(
                    cache.as_ref(),
                    file_id,
                    &config,
                    &search.path,
                    &search.child_slots,
                    search.path.len() - 1,
                    insertion_index,
                    entry,
                    wal.as_ref(),
                )?;
                let current_size = read_bucket_at(cache.as_ref(), file_id, root, config.max_bucket_size_bytes)?.get_tree_size();
                set_tree_size(cache.as_ref(), file_id, &config, root, current_size + 1, wal.as_ref())?;
                Ok(true)
            }
        })
    }

    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        let key_bytes = self.key_codec.encode(key);
        let _w = self.lock_manager.write_guard(self.file_id);

        let cache = self.cache.clone();
        let wal = self.wal.clone();
        let file_id = self.file_id;
        let config = self.config;
        let root = self.root;
        let value_codec = self.value_codec.clone();

        wal::run_atomic(wal.as_ref(), |_op| {
            let search = find_bucket(cache.as_ref(), file_id, &config, root, &key_bytes)?;
            if search.item_index < 0 {
                return Ok(None);
            }
            let leaf_ptr = *search.path.last().unwrap();
            let mut leaf = read_bucket_at(cache.as_ref(), file_id, leaf_ptr, config.max_bucket_size_bytes)?;
            let removed = leaf.remove(search.item_index as usize);
            write_bucket_at(cache.as_ref(), file_id, leaf_ptr, &leaf, config.max_bucket_size_bytes, wal.as_ref())?;

            let current_size = read_bucket_at(cache.as_ref(), file_id, root, config.max_bucket_size_bytes)?.get_tree_size();
            set_tree_size(cache.as_ref(), file_id, &config, root, current_size - 1, wal.as_ref())?;

            Ok(Some(value_codec.decode(removed.value())?))
        })
    }

    /// Ascending scan starting at `key` (inclusive iff `incl`); rejects
    /// `ascending=false` with a usage error, matching the "no descending
    /// scans" non-goal.
    pub fn load_entries_major(
        &self,
        key: &K,
        incl: bool,
        ascending: bool,
        mut listener: impl FnMut(&K, &V) -> bool,
    ) -> Result<()> {
        self.ensure_open()?;
        if !ascending {
            return Err(BonsaiError::Usage("descending range scans are not supported".into()));
        }
        let key_bytes = self.key_codec.encode(key);
        let _r = self.lock_manager.read_guard(self.file_id);
        let search = find_bucket(self.cache.as_ref(), self.file_id, &self.config, self.root, &key_bytes)?;

        let start_index = if search.item_index >= 0 {
            if incl { search.item_index as usize } else { search.item_index as usize + 1 }
        } else {
            (-search.item_index - 1) as usize
        };

        let mut ptr = *search.path.last().unwrap();
        let mut index = start_index;
        loop {
            let bucket = read_bucket_at(self.cache.as_ref(), self.file_id, ptr, self.config.max_bucket_size_bytes)?;
            while index < bucket.size() {
                let entry = bucket.get_entry(index);
                let k = self.key_codec.decode(entry.key())?;
                let v = self.value_codec.decode(entry.value())?;
                if !listener(&k, &v) {
                    return Ok(());
                }
                index += 1;
            }
            let next = bucket.get_right_sibling();
            if !next.is_valid() {
                return Ok(());
            }
            ptr = next;
            index = 0;
        }
    }

    /// Descending-within-leaf, sibling-to-the-left scan starting at `key`.
    pub fn load_entries_minor(&self, key: &K, incl: bool, mut listener: impl FnMut(&K, &V) -> bool) -> Result<()> {
        self.ensure_open()?;
        let key_bytes = self.key_codec.encode(key);
        let _r = self.lock_manager.read_guard(self.file_id);
        let search = find_bucket(self.cache.as_ref(), self.file_id, &self.config, self.root, &key_bytes)?;

        let start_index: i64 = if search.item_index >= 0 {
            if incl { search.item_index as i64 } else { search.item_index as i64 - 1 }
        } else {
            (-search.item_index - 1) as i64 - 1
        };

        let mut ptr = *search.path.last().unwrap();
        let mut index = start_index;
        loop {
            let bucket = read_bucket_at(self.cache.as_ref(), self.file_id, ptr, self.config.max_bucket_size_bytes)?;
            while index >= 0 {
                if (index as usize) < bucket.size() {
                    let entry = bucket.get_entry(index as usize);
                    let k = self.key_codec.decode(entry.key())?;
                    let v = self.value_codec.decode(entry.value())?;
                    if !listener(&k, &v) {
                        return Ok(());
                    }
                }
                index -= 1;
            }
            let prev = bucket.get_left_sibling();
            if !prev.is_valid() {
                return Ok(());
            }
            ptr = prev;
            let prev_bucket = read_bucket_at(self.cache.as_ref(), self.file_id, ptr, self.config.max_bucket_size_bytes)?;
            index = prev_bucket.size() as i64 - 1;
        }
    }

    /// Bounded ascending scan between two keys, inclusive/exclusive per
    /// endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn load_entries_between(
        &self,
        from: &K,
        from_incl: bool,
        to: &K,
        to_incl: bool,
        mut listener: impl FnMut(&K, &V) -> bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let to_bytes = self.key_codec.encode(to);
        self.load_entries_major(from, from_incl, true, |k, v| {
            let k_bytes = self.key_codec.encode(k);
            let in_range = match k_bytes.cmp(&to_bytes) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => to_incl,
                std::cmp::Ordering::Greater => false,
            };
            in_range && listener(k, v)
        })
    }

    /// Walk leftmost branch edges to a leaf and return its first key,
    /// unwinding via the path stack past empty leaves left behind by
    /// `remove`.
    pub fn first_key(&self) -> Result<Option<K>> {
        self.ensure_open()?;
        let _r = self.lock_manager.read_guard(self.file_id);
        self.walk_extreme(true)
    }

    pub fn last_key(&self) -> Result<Option<K>> {
        self.ensure_open()?;
        let _r = self.lock_manager.read_guard(self.file_id);
        self.walk_extreme(false)
    }

    /// Empty non-root leaves (left behind by `remove`) are skipped by
    /// following the leaf-level sibling chain rather than re-descending
    /// from an ancestor; since that chain already spans every leaf in key
    /// order, it reaches the correct extreme leaf directly.
    fn walk_extreme(&self, leftmost: bool) -> Result<Option<K>> {
        let mut ptr = self.root;
        loop {
            let bucket = read_bucket_at(self.cache.as_ref(), self.file_id, ptr, self.config.max_bucket_size_bytes)?;
            if bucket.is_leaf() {
                if !bucket.is_empty() {
                    let key_bytes = if leftmost { bucket.get_key(0) } else { bucket.get_key(bucket.size() - 1) };
                    return Ok(Some(self.key_codec.decode(key_bytes)?));
                }
                let sibling = if leftmost { bucket.get_right_sibling() } else { bucket.get_left_sibling() };
                if !sibling.is_valid() {
                    return Ok(None);
                }
                ptr = sibling;
                continue;
            }
            if bucket.is_empty() {
                return Ok(None);
            }
            ptr = if leftmost {
                bucket.get_entry(0).left_child()
            } else {
                bucket.get_entry(bucket.size() - 1).right_child()
            };
        }
    }

    /// Recycle the subtree under root (keeping the root bucket itself
    /// live), reset the root to an empty leaf, and zero `tree_size` while
    /// preserving `identifier` and the root's address.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open()?;
        let _w = self.lock_manager.write_guard(self.file_id);
        let cache = self.cache.clone();
        let wal = self.wal.clone();
        let file_id = self.file_id;
        let config = self.config;
        let root = self.root;

        wal::run_atomic(wal.as_ref(), |_op| {
            let root_bucket = read_bucket_at(cache.as_ref(), file_id, root, config.max_bucket_size_bytes)?;
            let identifier = root_bucket.get_identifier();
            let key_ser = root_bucket.key_serializer_id();
            let value_ser = root_bucket.value_serializer_id();

            let children = if root_bucket.is_leaf() {
                Vec::new()
            } else {
                let mut out = vec![root_bucket.get_entry(0).left_child()];
                for i in 0..root_bucket.size() {
                    out.push(root_bucket.get_entry(i).right_child());
                }
                out
            };

            let mut fresh_root = Bucket::new_leaf(key_ser, value_ser);
            fresh_root.set_identifier(identifier);
            fresh_root.set_tree_size(0);
            write_bucket_at(cache.as_ref(), file_id, root, &fresh_root, config.max_bucket_size_bytes, wal.as_ref())?;

            if !children.is_empty() {
                allocator::recycle(cache.as_ref(), file_id, &config, children, wal.as_ref())?;
            }
            Ok(())
        })?;
        debug!("tree: cleared root {root:?} in file {file_id}");
        Ok(())
    }

    /// Recycle every bucket of the tree, including the root. The tree is
    /// no longer usable afterward.
    pub fn delete(mut self) -> Result<()> {
        self.ensure_open()?;
        let _w = self.lock_manager.write_guard(self.file_id);
        let cache = self.cache.clone();
        let wal = self.wal.clone();
        let file_id = self.file_id;
        let config = self.config;
        let root = self.root;

        wal::run_atomic(wal.as_ref(), |_op| {
            allocator::recycle(cache.as_ref(), file_id, &config, vec![root], wal.as_ref())
        })?;
        self.closed = true;
        debug!("tree: deleted root {root:?} in file {file_id}");
        Ok(())
    }

    /// No-op in the in-memory reference cache; a disk-backed cache would
    /// flush dirty pages here.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()
    }

    /// Marks the tree unusable without touching any bucket; a disk-backed
    /// cache would additionally flush and unpin here if `flush=true`.
    pub fn close(mut self, flush: bool) -> Result<()> {
        if flush {
            self.flush()?;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryPageCache;
    use crate::codec::FixedU64Codec;
    use crate::wal::InMemoryAtomicOperationManager;

    fn fixture() -> (Arc<InMemoryPageCache>, Arc<InMemoryAtomicOperationManager>, Arc<LockManager>, FileId, BonsaiConfig) {
        let config = BonsaiConfig {
            page_size: 4096,
            // Sized so a leaf holds exactly 4 (8-byte key, 8-byte value) entries:
            // header (57) + 4 * (2 + 4+8 + 4+8) = 57 + 4*26 = 161 fits, a 5th
            // (187) doesn't.
            max_bucket_size_bytes: 180,
            free_space_reuse_trigger: 0.5,
        };
        let cache = Arc::new(InMemoryPageCache::new(config.page_size));
        let wal = Arc::new(InMemoryAtomicOperationManager::new());
        let lock_manager = Arc::new(LockManager::new());
        let file_id = cache.add_file("fixture.db").unwrap();
        (cache, wal, lock_manager, file_id, config)
    }

    fn new_tree(
        cache: Arc<InMemoryPageCache>,
        wal: Arc<InMemoryAtomicOperationManager>,
        lock_manager: Arc<LockManager>,
        file_id: FileId,
        config: BonsaiConfig,
    ) -> Tree<u64, u64> {
        Tree::create(
            cache,
            wal,
            lock_manager,
            file_id,
            config,
            Arc::new(FixedU64Codec),
            Arc::new(FixedU64Codec),
            0,
        )
        .unwrap()
    }

    #[test]
    fn put_get_round_trip_and_scan_order() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let mut tree = new_tree(cache, wal, lock_manager, file_id, config);

        for k in [5u64, 1, 3, 7, 2] {
            assert!(tree.put(&k, &(k * 10)).unwrap());
        }
        assert_eq!(tree.size().unwrap(), 5);
        for k in [5u64, 1, 3, 7, 2] {
            assert_eq!(tree.get(&k).unwrap(), Some(k * 10));
        }

        let mut seen = Vec::new();
        tree.load_entries_major(&0u64, true, true, |k, v| {
            seen.push((*k, *v));
            true
        })
        .unwrap();
        assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30), (5, 50), (7, 70)]);

        assert_eq!(tree.first_key().unwrap(), Some(1));
        assert_eq!(tree.last_key().unwrap(), Some(7));
    }

    #[test]
    fn put_overwrite_reports_modified_and_no_change_on_identical_value() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let mut tree = new_tree(cache, wal, lock_manager, file_id, config);

        assert!(tree.put(&5u64, &1u64).unwrap());
        assert!(tree.put(&5u64, &1u64).is_ok()); // same value -> NoChange, still Ok
        assert!(tree.put(&5u64, &2u64).unwrap());
        assert_eq!(tree.get(&5u64).unwrap(), Some(2));
    }

    #[test]
    fn remove_then_get_returns_none_and_size_drops() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let mut tree = new_tree(cache, wal, lock_manager, file_id, config);
        for k in [1u64, 2, 3] {
            tree.put(&k, &k).unwrap();
        }
        assert_eq!(tree.remove(&2u64).unwrap(), Some(2));
        assert_eq!(tree.get(&2u64).unwrap(), None);
        assert_eq!(tree.size().unwrap(), 2);
    }

    #[test]
    fn split_chain_propagates_to_root_and_preserves_identifier() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let key_codec: Arc<dyn Serializer<u64>> = Arc::new(FixedU64Codec);
        let value_codec: Arc<dyn Serializer<u64>> = Arc::new(FixedU64Codec);
        let mut tree = Tree::create(cache, wal, lock_manager, file_id, config, key_codec, value_codec, 77).unwrap();

        for k in 1..=20u64 {
            tree.put(&k, &k).unwrap();
        }
        assert_eq!(tree.size().unwrap(), 20);
        assert_eq!(tree.get_identifier().unwrap(), 77);

        let mut seen = Vec::new();
        tree.load_entries_major(&0u64, true, true, |k, _| {
            seen.push(*k);
            true
        })
        .unwrap();
        assert_eq!(seen, (1..=20u64).collect::<Vec<_>>());
    }

    #[test]
    fn clear_resets_size_but_keeps_root_pointer() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let mut tree = new_tree(cache, wal, lock_manager, file_id, config);
        for k in 1..=10u64 {
            tree.put(&k, &k).unwrap();
        }
        let root_before = tree.get_root_bucket_pointer();
        tree.clear().unwrap();
        assert_eq!(tree.size().unwrap(), 0);
        assert_eq!(tree.get_root_bucket_pointer(), root_before);
        assert_eq!(tree.get(&5u64).unwrap(), None);
        assert!(tree.put(&42u64, &1u64).unwrap());
    }

    #[test]
    fn delete_makes_the_tree_unusable() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let mut tree = new_tree(cache, wal, lock_manager, file_id, config);
        tree.put(&1u64, &1u64).unwrap();
        tree.delete().unwrap();
    }

    #[test]
    fn descending_scan_request_is_rejected() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let tree = new_tree(cache, wal, lock_manager, file_id, config);
        let result = tree.load_entries_major(&0u64, true, false, |_, _| true);
        assert!(matches!(result, Err(BonsaiError::Usage(_))));
    }

    #[test]
    fn two_trees_in_the_same_file_are_independent() {
        let (cache, wal, lock_manager, file_id, config) = fixture();
        let key_codec: Arc<dyn Serializer<u64>> = Arc::new(FixedU64Codec);
        let value_codec: Arc<dyn Serializer<u64>> = Arc::new(FixedU64Codec);
        let mut tree_a = Tree::create(
            cache.clone(),
            wal.clone(),
            lock_manager.clone(),
            file_id,
            config,
            key_codec.clone(),
            value_codec.clone(),
            1,
        )
        .unwrap();
        let mut tree_b = Tree::create(cache, wal, lock_manager, file_id, config, key_codec, value_codec, 2).unwrap();

        tree_a.put(&1u64, &100u64).unwrap();
        tree_b.put(&1u64, &200u64).unwrap();
        assert_eq!(tree_a.get(&1u64).unwrap(), Some(100));
        assert_eq!(tree_b.get(&1u64).unwrap(), Some(200));
        assert_ne!(tree_a.get_root_bucket_pointer(), tree_b.get_root_bucket_pointer());
    }
}
