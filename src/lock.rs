//! Layer 2 of the concurrency envelope: a per-file partitioned lock
//! manager keyed by `file_id`, sitting between the atomic-operation
//! manager's component lock (layer 1, [`crate::wal`]) and the per-page
//! latches (layer 3, [`crate::page`]). One writer per tree at a time,
//! many concurrent readers; coarser than a per-tree lock would be, which
//! is why it is partitioned rather than a single global `RwLock`.

use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;
use parking_lot::RwLock;

use crate::common::FileId;

const STRIPE_COUNT: usize = 16;

/// A striped lock table: `file_id` hashes to one of a fixed number of
/// stripes, each an independent `RwLock<()>`. Two files that hash to the
/// same stripe contend unnecessarily but correctly; this trades a little
/// false contention for a manager with no per-file bookkeeping to leak.
pub struct LockManager {
    stripes: Vec<Arc<RwLock<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Arc::new(RwLock::new(()))).collect(),
        }
    }

    fn stripe_for(&self, file_id: FileId) -> &Arc<RwLock<()>> {
        let mut hasher = FnvHasher::default();
        hasher.write_u64(file_id);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    /// Acquire the shared (read) stripe lock for `file_id`, for `get`,
    /// `size`, range scans, and first/last-key lookups.
    pub fn read_guard(&self, file_id: FileId) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.stripe_for(file_id).read()
    }

    /// Acquire the exclusive (write) stripe lock for `file_id`, for `put`,
    /// `remove`, `clear`, `delete`, and `set_identifier`.
    pub fn write_guard(&self, file_id: FileId) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.stripe_for(file_id).write()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_file_ids_can_map_to_different_stripes() {
        let mgr = LockManager::new();
        // Not asserting a specific stripe, just that lookup is stable and
        // doesn't panic for a spread of ids.
        for id in 0..64u64 {
            let _ = mgr.stripe_for(id);
        }
    }

    #[test]
    fn read_locks_are_shared_write_locks_are_exclusive() {
        let mgr = LockManager::new();
        let _r1 = mgr.read_guard(1);
        let _r2 = mgr.read_guard(1);
        drop(_r1);
        drop(_r2);
        let _w = mgr.write_guard(1);
    }
}
