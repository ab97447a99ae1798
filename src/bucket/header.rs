//! Bucket header flags and the three-way result of `update_value`.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BucketFlags: u8 {
        const IS_LEAF = 0x01;
        const DELETED = 0x02;
    }
}

/// Outcome of overwriting the value at an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The new encoding is bytewise identical to the old one.
    NoChange,
    /// The new value was written in place; no split/overflow handling needed.
    Updated,
    /// The new value does not fit in the bucket as-is; the caller must
    /// `remove` the entry and `add_entry` it again (possibly triggering a
    /// split).
    Reinsert,
}
