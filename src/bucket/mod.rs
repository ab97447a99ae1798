//! The bucket codec: header, sorted slot directory, and payload for a
//! single subpage. A [`Bucket`] is the in-memory, fully materialized view
//! of one on-disk bucket; [`Bucket::decode`] / [`Bucket::encode`] are the
//! only places that know the byte layout, the way `Page`/`OwnedPage` are
//! the only things that know a page's on-disk layout.
//!
//! The on-disk slot directory (an array of `u16` payload offsets, one per
//! entry) is still written so the persisted layout stays self-describing,
//! but since every bucket is decoded eagerly into a sorted
//! `Vec<BucketEntry>`, `find` binary-searches that vector directly rather
//! than re-deriving offsets from the directory on every lookup.

pub mod entry;
pub mod header;

pub use entry::BucketEntry;
pub use header::UpdateResult;
use header::BucketFlags;

use crate::common::{BucketPointer, ByteReader, ByteWriter};
use crate::errors::{BonsaiError, Result};

/// `flags(u8) + key_ser(u8) + value_ser(u8) + size(u16) + tree_size(u64) +
/// identifier(u64) + 3 pointers(12 bytes each)`.
pub(crate) const BUCKET_HEADER_SIZE: usize = 1 + 1 + 1 + 2 + 8 + 8 + 12 * 3;

/// One subpage's worth of tree node: header fields plus a sorted list of
/// entries.
#[derive(Debug, Clone)]
pub struct Bucket {
    flags: BucketFlags,
    tree_size: u64,
    identifier: u64,
    key_serializer_id: u8,
    value_serializer_id: u8,
    left_sibling: BucketPointer,
    right_sibling: BucketPointer,
    free_list_pointer: BucketPointer,
    entries: Vec<BucketEntry>,
}

impl Bucket {
    pub fn new_leaf(key_serializer_id: u8, value_serializer_id: u8) -> Self {
        Self {
            flags: BucketFlags::IS_LEAF,
            tree_size: 0,
            identifier: 0,
            key_serializer_id,
            value_serializer_id,
            left_sibling: BucketPointer::NULL,
            right_sibling: BucketPointer::NULL,
            free_list_pointer: BucketPointer::NULL,
            entries: Vec::new(),
        }
    }

    pub fn new_branch(key_serializer_id: u8, value_serializer_id: u8) -> Self {
        Self {
            flags: BucketFlags::empty(),
            tree_size: 0,
            identifier: 0,
            key_serializer_id,
            value_serializer_id,
            left_sibling: BucketPointer::NULL,
            right_sibling: BucketPointer::NULL,
            free_list_pointer: BucketPointer::NULL,
            entries: Vec::new(),
        }
    }

    // -- basic accessors -----------------------------------------------

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(BucketFlags::IS_LEAF)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(BucketFlags::DELETED)
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.flags.set(BucketFlags::DELETED, deleted);
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_serializer_id(&self) -> u8 {
        self.key_serializer_id
    }

    pub fn value_serializer_id(&self) -> u8 {
        self.value_serializer_id
    }

    pub fn get_tree_size(&self) -> u64 {
        self.tree_size
    }

    pub fn set_tree_size(&mut self, size: u64) {
        self.tree_size = size;
    }

    pub fn get_identifier(&self) -> u64 {
        self.identifier
    }

    pub fn set_identifier(&mut self, id: u64) {
        self.identifier = id;
    }

    pub fn get_left_sibling(&self) -> BucketPointer {
        self.left_sibling
    }

    pub fn set_left_sibling(&mut self, p: BucketPointer) {
        self.left_sibling = p;
    }

    pub fn get_right_sibling(&self) -> BucketPointer {
        self.right_sibling
    }

    pub fn set_right_sibling(&mut self, p: BucketPointer) {
        self.right_sibling = p;
    }

    pub fn get_free_list_pointer(&self) -> BucketPointer {
        self.free_list_pointer
    }

    pub fn set_free_list_pointer(&mut self, p: BucketPointer) {
        self.free_list_pointer = p;
    }

    pub fn get_entry(&self, i: usize) -> &BucketEntry {
        &self.entries[i]
    }

    pub fn get_key(&self, i: usize) -> &[u8] {
        self.entries[i].key()
    }

    pub fn entries(&self) -> &[BucketEntry] {
        &self.entries
    }

    // -- search ----------------------------------------------------------

    /// Binary search over the (sorted) entries. Returns the index if `key`
    /// matches exactly, else `-(insertion_point) - 1`.
    pub fn find(&self, key: &[u8]) -> i32 {
        match self.entries.binary_search_by(|e| e.key().cmp(key)) {
            Ok(i) => i as i32,
            Err(ip) => -(ip as i32) - 1,
        }
    }

    // -- mutation ----------------------------------------------------------

    /// Insert `entry` at position `i`. Returns `false` (leaving the bucket
    /// unchanged) iff the resulting bucket would exceed `max_bucket_size`;
    /// the caller must split in that case.
    ///
    /// `update_neighbors`: when inserting into a branch, reconcile the
    /// shared-child invariant with the entries adjacent to `i`.
    pub fn add_entry(
        &mut self,
        i: usize,
        entry: BucketEntry,
        update_neighbors: bool,
        max_bucket_size: usize,
    ) -> bool {
        let mut trial = self.entries.clone();
        trial.insert(i, entry);

        if update_neighbors && !self.is_leaf() {
            if i > 0 {
                let right_of_prev = trial[i].left_child();
                trial[i - 1].set_right_child(right_of_prev);
            }
            if i + 1 < trial.len() {
                let left_of_next = trial[i].right_child();
                trial[i + 1].set_left_child(left_of_next);
            }
        }

        if Self::byte_size_of(&trial) > max_bucket_size {
            return false;
        }
        self.entries = trial;
        true
    }

    /// Overwrite the value at entry `i` (leaf only). See [`UpdateResult`].
    pub fn update_value(&mut self, i: usize, value: Vec<u8>, max_bucket_size: usize) -> UpdateResult {
        let BucketEntry::Leaf { value: old_value, .. } = &self.entries[i] else {
            panic!("update_value() called on a branch entry");
        };
        if *old_value == value {
            return UpdateResult::NoChange;
        }

        let mut trial = self.entries.clone();
        let BucketEntry::Leaf { value: slot, .. } = &mut trial[i] else {
            unreachable!()
        };
        *slot = value;

        if Self::byte_size_of(&trial) > max_bucket_size {
            return UpdateResult::Reinsert;
        }
        self.entries = trial;
        UpdateResult::Updated
    }

    /// Delete entry `i`, compacting the entry list.
    pub fn remove(&mut self, i: usize) -> BucketEntry {
        self.entries.remove(i)
    }

    /// Bulk replacement used by split.
    pub fn add_all(&mut self, entries: Vec<BucketEntry>) {
        self.entries = entries;
    }

    /// Truncate to the first `new_size` entries, reclaiming payload bytes.
    pub fn shrink(&mut self, new_size: usize) {
        self.entries.truncate(new_size);
    }

    // -- sizing ----------------------------------------------------------

    pub fn byte_size(&self) -> usize {
        Self::byte_size_of(&self.entries)
    }

    fn byte_size_of(entries: &[BucketEntry]) -> usize {
        BUCKET_HEADER_SIZE
            + entries.len() * 2 // slot directory
            + entries.iter().map(BucketEntry::byte_size).sum::<usize>()
    }

    // -- (de)serialization -------------------------------------------------

    /// Encode this bucket into exactly `bucket_size` bytes, zero-padding the
    /// unused tail. Fails if the logical contents don't fit.
    pub fn encode(&self, bucket_size: usize) -> Result<Vec<u8>> {
        let needed = self.byte_size();
        if needed > bucket_size {
            return Err(BonsaiError::Usage(format!(
                "bucket contents ({needed} bytes) exceed bucket_size ({bucket_size} bytes)"
            )));
        }

        let mut w = ByteWriter::with_capacity(bucket_size);
        w.put_u8(self.flags.bits());
        w.put_u8(self.key_serializer_id);
        w.put_u8(self.value_serializer_id);
        w.put_u16(self.entries.len() as u16);
        w.put_u64(self.tree_size);
        w.put_u64(self.identifier);
        w.put_pointer(self.left_sibling);
        w.put_pointer(self.right_sibling);
        w.put_pointer(self.free_list_pointer);

        // Slot directory: offsets into the payload region, in entry order
        // (entries are already key-sorted so this is also key order).
        let mut offset: u16 = 0;
        let mut offsets = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            offsets.push(offset);
            offset += e.byte_size() as u16;
        }
        for o in offsets {
            w.put_u16(o);
        }

        for e in &self.entries {
            match e {
                BucketEntry::Leaf { key, value } => {
                    w.put_bytes(key);
                    w.put_bytes(value);
                }
                BucketEntry::Branch { left_child, right_child, key } => {
                    w.put_pointer(*left_child);
                    w.put_pointer(*right_child);
                    w.put_bytes(key);
                }
            }
        }

        let mut buf = w.into_vec();
        buf.resize(bucket_size, 0);
        Ok(buf)
    }

    /// Decode a bucket from a `bucket_size`-byte region.
    pub fn decode(buf: &[u8]) -> Result<Bucket> {
        let mut r = ByteReader::new(buf);
        let flags = BucketFlags::from_bits(r.get_u8()?)
            .ok_or_else(|| BonsaiError::Corruption("unknown bucket flag bits".into()))?;
        let key_serializer_id = r.get_u8()?;
        let value_serializer_id = r.get_u8()?;
        let size = r.get_u16()? as usize;
        let tree_size = r.get_u64()?;
        let identifier = r.get_u64()?;
        let left_sibling = r.get_pointer()?;
        let right_sibling = r.get_pointer()?;
        let free_list_pointer = r.get_pointer()?;

        // Skip the slot directory; entries are self-describing and decoded
        // positionally below.
        for _ in 0..size {
            r.get_u16()?;
        }

        let is_leaf = flags.contains(BucketFlags::IS_LEAF);
        let mut entries = Vec::with_capacity(size);
        for _ in 0..size {
            if is_leaf {
                let key = r.get_bytes()?;
                let value = r.get_bytes()?;
                entries.push(BucketEntry::Leaf { key, value });
            } else {
                let left_child = r.get_pointer()?;
                let right_child = r.get_pointer()?;
                let key = r.get_bytes()?;
                entries.push(BucketEntry::Branch { left_child, right_child, key });
            }
        }

        for w in entries.windows(2) {
            if w[0].key() >= w[1].key() {
                return Err(BonsaiError::Corruption("bucket entries not strictly ordered".into()));
            }
        }

        Ok(Bucket {
            flags,
            tree_size,
            identifier,
            key_serializer_id,
            value_serializer_id,
            left_sibling,
            right_sibling,
            free_list_pointer,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 512;

    fn leaf(k: u8, v: u8) -> BucketEntry {
        BucketEntry::Leaf { key: vec![k], value: vec![v] }
    }

    #[test]
    fn find_exact_and_insertion_point() {
        let mut b = Bucket::new_leaf(1, 2);
        assert!(b.add_entry(0, leaf(3, 30), false, MAX));
        assert!(b.add_entry(1, leaf(5, 50), false, MAX));
        assert_eq!(b.find(&[3]), 0);
        assert_eq!(b.find(&[5]), 1);
        assert_eq!(b.find(&[4]), -2); // insertion point 1 -> -(1)-1
        assert_eq!(b.find(&[0]), -1); // insertion point 0 -> -(0)-1
    }

    #[test]
    fn add_entry_rejects_overflow() {
        let mut b = Bucket::new_leaf(1, 2);
        assert!(!b.add_entry(0, BucketEntry::Leaf { key: vec![0; 10], value: vec![0; 10000] }, false, MAX));
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn update_value_no_change_vs_updated_vs_reinsert() {
        let mut b = Bucket::new_leaf(1, 2);
        assert!(b.add_entry(0, leaf(1, 9), false, MAX));
        assert_eq!(b.update_value(0, vec![9], MAX), UpdateResult::NoChange);
        assert_eq!(b.update_value(0, vec![10], MAX), UpdateResult::Updated);
        assert_eq!(b.update_value(0, vec![0; 10_000], MAX), UpdateResult::Reinsert);
    }

    #[test]
    fn encode_decode_round_trip_leaf() {
        let mut b = Bucket::new_leaf(1, 2);
        assert!(b.add_entry(0, leaf(1, 10), false, MAX));
        assert!(b.add_entry(1, leaf(3, 30), false, MAX));
        b.set_tree_size(2);
        b.set_identifier(42);
        b.set_left_sibling(BucketPointer::new(0, 0));

        let bytes = b.encode(MAX).unwrap();
        assert_eq!(bytes.len(), MAX);
        let decoded = Bucket::decode(&bytes).unwrap();
        assert!(decoded.is_leaf());
        assert_eq!(decoded.size(), 2);
        assert_eq!(decoded.get_key(0), &[1][..]);
        assert_eq!(decoded.get_tree_size(), 2);
        assert_eq!(decoded.get_identifier(), 42);
        assert_eq!(decoded.get_left_sibling(), BucketPointer::new(0, 0));
    }

    #[test]
    fn encode_decode_round_trip_branch_with_shared_children() {
        let mut b = Bucket::new_branch(1, 2);
        let left = BucketPointer::new(0, 0);
        let mid = BucketPointer::new(0, 128);
        let right = BucketPointer::new(0, 256);
        assert!(b.add_entry(
            0,
            BucketEntry::Branch { left_child: left, right_child: mid, key: vec![5] },
            false,
            MAX
        ));
        assert!(b.add_entry(
            1,
            BucketEntry::Branch { left_child: mid, right_child: right, key: vec![9] },
            true,
            MAX
        ));
        assert_eq!(b.get_entry(0).right_child(), b.get_entry(1).left_child());

        let bytes = b.encode(MAX).unwrap();
        let decoded = Bucket::decode(&bytes).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.get_entry(0).right_child(), decoded.get_entry(1).left_child());
    }

    #[test]
    fn remove_compacts_entries() {
        let mut b = Bucket::new_leaf(1, 2);
        assert!(b.add_entry(0, leaf(1, 10), false, MAX));
        assert!(b.add_entry(1, leaf(2, 20), false, MAX));
        assert!(b.add_entry(2, leaf(3, 30), false, MAX));
        b.remove(1);
        assert_eq!(b.size(), 2);
        assert_eq!(b.get_key(1), &[3][..]);
    }
}
