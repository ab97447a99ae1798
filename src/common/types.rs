//!
//! Crate-wide tunables and identifiers.
//!

use once_cell::sync::Lazy;

/// Identifier of a physical file inside the page cache. Opaque to the tree
/// engine; handed out by `PageCache::add_file` / `open_file`.
pub type FileId = u64;

/// Identifier of an atomic operation, handed out by the WAL/atomic-ops
/// collaborator.
pub type TxId = u64;

/// Default page size, mirroring the host OS page size unless overridden by
/// `BonsaiConfig`.
pub(crate) static DEFAULT_PAGE_SIZE: Lazy<usize> = Lazy::new(page_size::get);

/// Default bucket (subpage) size. Deliberately small relative to the page
/// size so that many trees can share one page.
pub const DEFAULT_MAX_BUCKET_SIZE_BYTES: usize = 1024;

/// Default ratio of `free_list_length / total_bucket_slots_in_file` above
/// which the allocator prefers reuse over bumping the free-space pointer.
pub const DEFAULT_FREE_SPACE_REUSE_TRIGGER: f64 = 0.5;

/// Tunables threaded into the allocator and tree engine for a given file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonsaiConfig {
    pub page_size: usize,
    pub max_bucket_size_bytes: usize,
    pub free_space_reuse_trigger: f64,
}

impl Default for BonsaiConfig {
    fn default() -> Self {
        Self {
            page_size: *DEFAULT_PAGE_SIZE,
            max_bucket_size_bytes: DEFAULT_MAX_BUCKET_SIZE_BYTES,
            free_space_reuse_trigger: DEFAULT_FREE_SPACE_REUSE_TRIGGER,
        }
    }
}

impl BonsaiConfig {
    /// Number of bucket slots per page, `floor(page_size / max_bucket_size_bytes)`.
    pub fn buckets_per_page(&self) -> usize {
        self.page_size / self.max_bucket_size_bytes
    }
}
