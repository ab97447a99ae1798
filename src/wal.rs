//! Atomic-operation manager: consumed, not owned. Every public mutator on
//! [`crate::tree::Tree`] starts an operation before touching any page and
//! ends it (commit or rollback) before returning. The manager also guards
//! the component-level read lock used by the concurrency envelope's
//! outermost layer.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{trace, warn};

use crate::common::TxId;
use crate::errors::{BonsaiError, Result};
use crate::page::PinnedPage;

pub trait AtomicOperationManager: Send + Sync {
    /// Begin a new operation. `rollback_only_on_error`: when false, the
    /// caller intends to explicitly decide commit/rollback regardless of
    /// whether an error occurred (used by tests exercising rollback paths).
    fn start_atomic_operation(&self, rollback_only_on_error: bool) -> Result<TxId>;

    /// Record the pre-mutation bytes of a page so they can be restored on
    /// rollback. Must be called before the first mutation of a given page
    /// within an operation.
    fn journal_before_image(&self, op: TxId, page: &PinnedPage, before: Vec<u8>);

    /// End the operation. On `rollback=true`, every journaled before-image
    /// is written back to its page before the operation is discarded.
    fn end_atomic_operation(&self, op: TxId, rollback: bool, error: Option<&BonsaiError>) -> Result<()>;

    fn current_operation(&self) -> Option<TxId>;

    fn acquire_read_lock(&self, component: &str);
    fn release_read_lock(&self, component: &str);
}

struct Journal {
    entries: Vec<(PinnedPage, Vec<u8>)>,
    rollback_only_on_error: bool,
}

/// In-memory [`AtomicOperationManager`]: whole-page before-images stand in
/// for the real WAL's per-page delta records (out of scope; see the
/// crate's Non-goals). Rollback replays the before-images directly onto
/// the pages they were captured from.
pub struct InMemoryAtomicOperationManager {
    next_tx: AtomicU64,
    journals: Mutex<HashMap<TxId, Journal>>,
    component_locks: Mutex<HashMap<String, u32>>,
}

thread_local! {
    static CURRENT_OP: Cell<Option<TxId>> = const { Cell::new(None) };
}

impl InMemoryAtomicOperationManager {
    pub fn new() -> Self {
        Self {
            next_tx: AtomicU64::new(1),
            journals: Mutex::new(HashMap::new()),
            component_locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAtomicOperationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicOperationManager for InMemoryAtomicOperationManager {
    fn start_atomic_operation(&self, rollback_only_on_error: bool) -> Result<TxId> {
        let tx = self.next_tx.fetch_add(1, Ordering::SeqCst);
        self.journals.lock().unwrap().insert(
            tx,
            Journal {
                entries: Vec::new(),
                rollback_only_on_error,
            },
        );
        CURRENT_OP.with(|c| c.set(Some(tx)));
        trace!("wal: started atomic operation {tx}");
        Ok(tx)
    }

    fn journal_before_image(&self, op: TxId, page: &PinnedPage, before: Vec<u8>) {
        if let Some(journal) = self.journals.lock().unwrap().get_mut(&op) {
            journal.entries.push((page.clone(), before));
        }
    }

    fn end_atomic_operation(&self, op: TxId, rollback: bool, error: Option<&BonsaiError>) -> Result<()> {
        let journal = self
            .journals
            .lock()
            .unwrap()
            .remove(&op)
            .ok_or_else(|| BonsaiError::Usage(format!("unknown atomic operation {op}")))?;

        CURRENT_OP.with(|c| {
            if c.get() == Some(op) {
                c.set(None);
            }
        });

        if rollback {
            for (page, before) in journal.entries.into_iter().rev() {
                page.acquire_exclusive_latch();
                page.write(0, &before);
                page.release_exclusive_latch();
            }
            if let Some(e) = error {
                trace!("wal: rolled back operation {op} after error: {e}");
            }
        } else {
            trace!("wal: committed operation {op}");
        }
        Ok(())
    }

    fn current_operation(&self) -> Option<TxId> {
        CURRENT_OP.with(|c| c.get())
    }

    fn acquire_read_lock(&self, component: &str) {
        let mut locks = self.component_locks.lock().unwrap();
        *locks.entry(component.to_string()).or_insert(0) += 1;
    }

    fn release_read_lock(&self, component: &str) {
        let mut locks = self.component_locks.lock().unwrap();
        if let Some(count) = locks.get_mut(component) {
            if *count == 0 {
                warn!("wal: release_read_lock({component}) called with no matching acquire");
            } else {
                *count -= 1;
            }
        }
    }
}

/// Helper covering the common "start, run, commit-or-rollback" pattern so
/// `tree.rs` doesn't repeat the envelope at every mutator.
pub(crate) fn run_atomic<T>(
    wal: &dyn AtomicOperationManager,
    f: impl FnOnce(TxId) -> Result<T>,
) -> Result<T> {
    let op = wal.start_atomic_operation(true)?;
    match f(op) {
        Ok(value) => {
            wal.end_atomic_operation(op, false, None)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = wal.end_atomic_operation(op, true, Some(&e)) {
                warn!("wal: rollback of operation {op} itself failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PinnedPage;

    #[test]
    fn commit_keeps_page_contents() {
        let wal = InMemoryAtomicOperationManager::new();
        let page = PinnedPage::new(1, 0, 64);
        let op = wal.start_atomic_operation(true).unwrap();
        wal.journal_before_image(op, &page, page.read(0, 64));
        page.acquire_exclusive_latch();
        page.write(0, &[9, 9, 9]);
        page.release_exclusive_latch();
        wal.end_atomic_operation(op, false, None).unwrap();
        assert_eq!(page.read(0, 3), vec![9, 9, 9]);
    }

    #[test]
    fn rollback_restores_before_image() {
        let wal = InMemoryAtomicOperationManager::new();
        let page = PinnedPage::new(1, 0, 64);
        let op = wal.start_atomic_operation(true).unwrap();
        let before = page.read(0, 64);
        wal.journal_before_image(op, &page, before);
        page.acquire_exclusive_latch();
        page.write(0, &[9, 9, 9]);
        page.release_exclusive_latch();
        wal.end_atomic_operation(op, true, Some(&BonsaiError::StorageIo("disk full".into())))
            .unwrap();
        assert_eq!(page.read(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn run_atomic_rolls_back_on_error() {
        let wal = InMemoryAtomicOperationManager::new();
        let page = PinnedPage::new(1, 0, 64);
        let result: Result<()> = run_atomic(&wal, |op| {
            wal.journal_before_image(op, &page, page.read(0, 64));
            page.acquire_exclusive_latch();
            page.write(0, &[1, 2, 3]);
            page.release_exclusive_latch();
            Err(BonsaiError::Usage("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(page.read(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn component_read_lock_tracks_balance() {
        let wal = InMemoryAtomicOperationManager::new();
        wal.acquire_read_lock("atomic-ops");
        wal.release_read_lock("atomic-ops");
    }
}
