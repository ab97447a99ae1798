//! `get_real_bag_size`: the canonical client of this engine stores a
//! per-vertex "rid bag" as a tree of `(edge_id, count)` pairs. Computing
//! its live size needs to fold in counts the caller has buffered but not
//! yet flushed to the tree, keyed by the same `K`.
//!
//! A pending change is modeled as a plain additive delta (`apply_to(x) =
//! x + delta`), the simplest contract that satisfies "entries not present
//! in the tree contribute `change.apply_to(0)`".

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::errors::Result;
use crate::tree::Tree;

/// Sum of every value in the tree plus the pending delta for its key (if
/// any), plus the deltas of pending keys that don't exist in the tree
/// yet. When the tree is empty, `first_key()` has no key to seed a scan
/// with, so this short-circuits straight to summing the pending deltas.
pub fn get_real_bag_size<K>(tree: &Tree<K, i64>, pending_changes: &HashMap<K, i64>) -> Result<i32>
where
    K: Eq + Hash + Clone,
{
    let mut total: i64 = 0;

    let Some(first) = tree.first_key()? else {
        for delta in pending_changes.values() {
            total += delta;
        }
        return Ok(total as i32);
    };

    let mut seen_keys: HashSet<K> = HashSet::new();
    tree.load_entries_major(&first, true, true, |k, v| {
        let delta = pending_changes.get(k).copied().unwrap_or(0);
        total += v + delta;
        seen_keys.insert(k.clone());
        true
    })?;

    for (k, delta) in pending_changes {
        if !seen_keys.contains(k) {
            total += delta;
        }
    }

    Ok(total as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryPageCache;
    use crate::codec::{FixedI64Codec, FixedU64Codec};
    use crate::common::BonsaiConfig;
    use crate::lock::LockManager;
    use crate::wal::InMemoryAtomicOperationManager;
    use std::sync::Arc;

    fn fixture_tree() -> Tree<u64, i64> {
        let config = BonsaiConfig {
            page_size: 4096,
            max_bucket_size_bytes: 180,
            free_space_reuse_trigger: 0.5,
        };
        let cache = Arc::new(InMemoryPageCache::new(config.page_size));
        let wal = Arc::new(InMemoryAtomicOperationManager::new());
        let lock_manager = Arc::new(LockManager::new());
        let file_id = cache.add_file("ridbag.db").unwrap();
        Tree::create(cache, wal, lock_manager, file_id, config, Arc::new(FixedU64Codec), Arc::new(FixedI64Codec), 0).unwrap()
    }

    #[test]
    fn empty_tree_short_circuits_to_pending_sum() {
        let tree = fixture_tree();
        let mut pending = HashMap::new();
        pending.insert(1u64, 5i64);
        pending.insert(2u64, -2i64);
        assert_eq!(get_real_bag_size(&tree, &pending).unwrap(), 3);
    }

    #[test]
    fn combines_stored_and_pending_and_new_keys() {
        let mut tree = fixture_tree();
        tree.put(&1u64, &10i64).unwrap();
        tree.put(&2u64, &20i64).unwrap();

        let mut pending = HashMap::new();
        pending.insert(1u64, 5i64); // 10 + 5
        pending.insert(3u64, 7i64); // not in tree yet: apply_to(0) == 7

        assert_eq!(get_real_bag_size(&tree, &pending).unwrap(), 10 + 5 + 20 + 7);
    }
}
