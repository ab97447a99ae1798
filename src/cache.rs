//! The page cache: consumed by the allocator and tree engine, never owned
//! by them. The real thing is a read-through/write-back buffer pool with
//! eviction and flushing; this crate only needs the interface, plus an
//! in-memory reference implementation so the tree engine is testable
//! without a disk-backed cache underneath it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::trace;

use crate::common::FileId;
use crate::errors::{BonsaiError, Result};
use crate::page::PinnedPage;

/// Read-through/write-back page buffer pool, keyed by file name and
/// `(file_id, page_index)`.
pub trait PageCache: Send + Sync {
    fn add_file(&self, name: &str) -> Result<FileId>;
    fn open_file(&self, name: &str) -> Result<FileId>;
    fn is_file_exists(&self, name: &str) -> bool;
    fn close_file(&self, file_id: FileId, flush: bool) -> Result<()>;
    fn load_page(&self, file_id: FileId, page_index: i64, check_pin: bool) -> Result<PinnedPage>;
    fn add_page(&self, file_id: FileId) -> Result<PinnedPage>;
    fn release_page(&self, page: PinnedPage);
    fn filled_up_to(&self, file_id: FileId) -> Result<i64>;
    fn page_size(&self) -> usize;
}

struct FileState {
    name: String,
    pages: Vec<PinnedPage>,
}

/// In-memory [`PageCache`]. No eviction: every page ever added stays
/// resident for the process lifetime, which is fine for an engine whose
/// scope ends at the subpage/allocator/tree layer and treats the real
/// buffer pool as an external collaborator.
pub struct InMemoryPageCache {
    page_size: usize,
    next_file_id: AtomicU64,
    files: Mutex<HashMap<FileId, FileState>>,
    names: Mutex<HashMap<String, FileId>>,
}

impl InMemoryPageCache {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            next_file_id: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
        }
    }
}

impl PageCache for InMemoryPageCache {
    fn add_file(&self, name: &str) -> Result<FileId> {
        let mut names = self.names.lock().unwrap();
        if let Some(id) = names.get(name) {
            return Ok(*id);
        }
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        names.insert(name.to_string(), id);
        self.files.lock().unwrap().insert(
            id,
            FileState {
                name: name.to_string(),
                pages: Vec::new(),
            },
        );
        trace!("cache: added file {name} as file_id {id}");
        Ok(id)
    }

    fn open_file(&self, name: &str) -> Result<FileId> {
        self.names
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| BonsaiError::Usage(format!("no such file: {name}")))
    }

    fn is_file_exists(&self, name: &str) -> bool {
        self.names.lock().unwrap().contains_key(name)
    }

    fn close_file(&self, file_id: FileId, _flush: bool) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let state = files
            .remove(&file_id)
            .ok_or_else(|| BonsaiError::Usage(format!("no such file_id: {file_id}")))?;
        self.names.lock().unwrap().remove(&state.name);
        Ok(())
    }

    fn load_page(&self, file_id: FileId, page_index: i64, _check_pin: bool) -> Result<PinnedPage> {
        let files = self.files.lock().unwrap();
        let state = files
            .get(&file_id)
            .ok_or_else(|| BonsaiError::Usage(format!("no such file_id: {file_id}")))?;
        state
            .pages
            .get(page_index as usize)
            .cloned()
            .ok_or_else(|| BonsaiError::Corruption(format!("page {page_index} not present in file {file_id}")))
    }

    fn add_page(&self, file_id: FileId) -> Result<PinnedPage> {
        let mut files = self.files.lock().unwrap();
        let state = files
            .get_mut(&file_id)
            .ok_or_else(|| BonsaiError::Usage(format!("no such file_id: {file_id}")))?;
        let index = state.pages.len() as i64;
        let page = PinnedPage::new(file_id, index, self.page_size);
        state.pages.push(page.clone());
        Ok(page)
    }

    fn release_page(&self, _page: PinnedPage) {
        // No eviction in the reference implementation; released pages just
        // drop their extra `Arc` handle.
    }

    fn filled_up_to(&self, file_id: FileId) -> Result<i64> {
        let files = self.files.lock().unwrap();
        let state = files
            .get(&file_id)
            .ok_or_else(|| BonsaiError::Usage(format!("no such file_id: {file_id}")))?;
        Ok(state.pages.len() as i64)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_added_page_is_index_zero() {
        let cache = InMemoryPageCache::new(4096);
        let file_id = cache.add_file("t.db").unwrap();
        let page = cache.add_page(file_id).unwrap();
        assert_eq!(page.page_index(), 0);
    }

    #[test]
    fn filled_up_to_tracks_page_count() {
        let cache = InMemoryPageCache::new(4096);
        let file_id = cache.add_file("t.db").unwrap();
        cache.add_page(file_id).unwrap();
        cache.add_page(file_id).unwrap();
        assert_eq!(cache.filled_up_to(file_id).unwrap(), 2);
    }

    #[test]
    fn open_file_requires_prior_add() {
        let cache = InMemoryPageCache::new(4096);
        assert!(cache.open_file("missing.db").is_err());
        cache.add_file("t.db").unwrap();
        assert!(cache.open_file("t.db").is_ok());
    }
}
