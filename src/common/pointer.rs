//!
//! Bucket pointer: the opaque `(page_index, page_offset)` address of a
//! subpage.
//!

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Address of a bucket inside a file: the page it lives on and its byte
/// offset within that page.
///
/// `page_index` and `page_offset` are signed so that [`BucketPointer::NULL`]
/// (`(-1, -1)`) is representable directly, rather than wrapping every
/// pointer in an `Option`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BucketPointer {
    pub page_index: i64,
    pub page_offset: i32,
    _pad: i32,
}

impl BucketPointer {
    pub const NULL: BucketPointer = BucketPointer {
        page_index: -1,
        page_offset: -1,
        _pad: 0,
    };

    pub const fn new(page_index: i64, page_offset: i32) -> Self {
        Self {
            page_index,
            page_offset,
            _pad: 0,
        }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.page_index >= 0
    }

    pub(crate) fn byte_offset(&self, page_size: usize) -> u64 {
        debug_assert!(self.is_valid());
        self.page_index as u64 * page_size as u64 + self.page_offset as u64
    }
}

impl Default for BucketPointer {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for BucketPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "BucketPointer({}, {})", self.page_index, self.page_offset)
        } else {
            write!(f, "BucketPointer(NULL)")
        }
    }
}

impl fmt::Display for BucketPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
