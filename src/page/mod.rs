//! A page is a fixed-size region of a file; a [`PinnedPage`] is a page
//! pinned in memory by the cache with an explicit shared/exclusive latch,
//! mirroring the cache interface's `acquire_shared_latch` /
//! `acquire_exclusive_latch` / `release_shared_latch` /
//! `release_exclusive_latch` contract rather than a scope-guard API, since
//! callers (the allocator, the tree engine's split) hold latches across
//! several operations and release them out of acquisition order.

use std::cell::UnsafeCell;
use std::sync::Arc;

use lock_api::RawRwLock as _;
use parking_lot::RawRwLock;

use crate::common::FileId;

struct PageInner {
    buf: UnsafeCell<Vec<u8>>,
    latch: RawRwLock,
}

// SAFETY: all access to `buf` is gated by `latch`; callers of `PinnedPage`
// are required to hold the matching latch before calling `read`/`write`.
unsafe impl Send for PageInner {}
unsafe impl Sync for PageInner {}

/// A page pinned by the cache, addressable by `(file_id, page_index)`.
/// Cloning a `PinnedPage` shares the same backing buffer and latch (it is
/// a handle, the way a cache entry is shared across callers holding the
/// same pin).
#[derive(Clone)]
pub struct PinnedPage {
    file_id: FileId,
    page_index: i64,
    inner: Arc<PageInner>,
}

impl PinnedPage {
    pub(crate) fn new(file_id: FileId, page_index: i64, page_size: usize) -> Self {
        Self {
            file_id,
            page_index,
            inner: Arc::new(PageInner {
                buf: UnsafeCell::new(vec![0u8; page_size]),
                latch: RawRwLock::INIT,
            }),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn page_index(&self) -> i64 {
        self.page_index
    }

    pub fn acquire_shared_latch(&self) {
        self.inner.latch.lock_shared();
    }

    pub fn acquire_exclusive_latch(&self) {
        self.inner.latch.lock_exclusive();
    }

    pub fn release_shared_latch(&self) {
        // SAFETY: caller holds the shared latch it is releasing, per the
        // acquire/release discipline documented on this type.
        unsafe { self.inner.latch.unlock_shared() };
    }

    pub fn release_exclusive_latch(&self) {
        // SAFETY: caller holds the exclusive latch it is releasing.
        unsafe { self.inner.latch.unlock_exclusive() };
    }

    /// Read `len` bytes at `offset` into the page. Caller must hold at
    /// least a shared latch.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        // SAFETY: caller holds a shared or exclusive latch on this page, so
        // no concurrent writer can be mutating `buf`.
        let buf = unsafe { &*self.inner.buf.get() };
        buf[offset..offset + len].to_vec()
    }

    /// Overwrite `len = bytes.len()` bytes at `offset`. Caller must hold
    /// the exclusive latch.
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        // SAFETY: caller holds the exclusive latch on this page.
        let buf = unsafe { &mut *self.inner.buf.get() };
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        // SAFETY: length is read-only metadata fixed at construction.
        unsafe { &*self.inner.buf.get() }.len()
    }
}

impl std::fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("file_id", &self.file_id)
            .field("page_index", &self.page_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let p = PinnedPage::new(1, 0, 4096);
        p.acquire_exclusive_latch();
        p.write(10, &[1, 2, 3]);
        p.release_exclusive_latch();

        p.acquire_shared_latch();
        assert_eq!(p.read(10, 3), vec![1, 2, 3]);
        p.release_shared_latch();
    }
}
