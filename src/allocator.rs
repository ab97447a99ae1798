//! The bucket allocator: hands out fresh buckets, preferring the free
//! list once it passes a configured fraction of total capacity, and mass
//! frees whole subtrees back onto it.

use std::collections::VecDeque;

use log::trace;

use crate::bucket::Bucket;
use crate::cache::PageCache;
use crate::common::{BonsaiConfig, BucketPointer, FileId};
use crate::errors::{BonsaiError, Result};
use crate::sysbucket::{SystemBucket, SYSBUCKET_SIZE};
use crate::wal::AtomicOperationManager;

/// Record the page's current bytes as the before-image for the caller's
/// atomic operation, if one is open. A no-op outside an operation (plain
/// reads, and the harness's own unit tests that write pages directly).
/// Safe to call more than once per page per operation: rollback replays
/// journaled before-images in reverse order, so the earliest-captured
/// image always wins regardless of how many times a page was re-journaled
/// in between.
fn journal_page(wal: &dyn AtomicOperationManager, page: &crate::page::PinnedPage) {
    if let Some(op) = wal.current_operation() {
        page.acquire_shared_latch();
        let before = page.read(0, page.len());
        page.release_shared_latch();
        wal.journal_before_image(op, page, before);
    }
}

pub(crate) fn read_sysbucket(cache: &dyn PageCache, file_id: FileId) -> Result<SystemBucket> {
    let page = cache.load_page(file_id, 0, false)?;
    page.acquire_shared_latch();
    let bytes = page.read(0, SYSBUCKET_SIZE);
    page.release_shared_latch();
    SystemBucket::decode(&bytes)
}

fn write_sysbucket(cache: &dyn PageCache, file_id: FileId, sb: &SystemBucket, wal: &dyn AtomicOperationManager) -> Result<()> {
    let page = cache.load_page(file_id, 0, false)?;
    journal_page(wal, &page);
    page.acquire_exclusive_latch();
    page.write(0, &sb.encode());
    page.release_exclusive_latch();
    Ok(())
}

pub(crate) fn read_bucket_at(cache: &dyn PageCache, file_id: FileId, ptr: BucketPointer, bucket_size: usize) -> Result<Bucket> {
    let page = cache.load_page(file_id, ptr.page_index, false)?;
    page.acquire_shared_latch();
    let bytes = page.read(ptr.page_offset as usize, bucket_size);
    page.release_shared_latch();
    Bucket::decode(&bytes)
}

pub(crate) fn write_bucket_at(
    cache: &dyn PageCache,
    file_id: FileId,
    ptr: BucketPointer,
    bucket: &Bucket,
    bucket_size: usize,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    let page = cache.load_page(file_id, ptr.page_index, false)?;
    journal_page(wal, &page);
    page.acquire_exclusive_latch();
    page.write(ptr.page_offset as usize, &bucket.encode(bucket_size)?);
    page.release_exclusive_latch();
    Ok(())
}

/// `initSysBucket`: called once per file, the first time a tree is
/// created or loaded in it. A no-op if the system bucket is already
/// initialized.
pub(crate) fn init_sysbucket(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    if cache.filled_up_to(file_id)? > 0 {
        return Ok(());
    }
    let page = cache.add_page(file_id)?;
    if page.page_index() != 0 {
        return Err(BonsaiError::Corruption(
            "first add_page for a freshly added file did not return page index 0".into(),
        ));
    }
    let sb = SystemBucket::fresh(config.max_bucket_size_bytes);
    write_sysbucket(cache, file_id, &sb, wal)
}

/// `allocate_bucket`: returns the address of a fresh, unused bucket slot.
/// Reuses a free-list entry once `free_list_length / total_slots` reaches
/// `config.free_space_reuse_trigger`; otherwise bumps the free-space
/// pointer, extending the file by one page when the current page is full.
///
/// The returned bucket slot's previous contents are undefined; the caller
/// is responsible for writing a freshly initialized bucket into it.
pub(crate) fn allocate_bucket(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    wal: &dyn AtomicOperationManager,
) -> Result<BucketPointer> {
    let mut sb = read_sysbucket(cache, file_id)?;
    let total_slots = (cache.filled_up_to(file_id)? as usize) * config.buckets_per_page();
    let ratio = if total_slots == 0 {
        0.0
    } else {
        sb.free_list_length() as f64 / total_slots as f64
    };

    if sb.free_list_head().is_valid() && ratio >= config.free_space_reuse_trigger {
        let head = sb.free_list_head();
        let recycled = read_bucket_at(cache, file_id, head, config.max_bucket_size_bytes)?;
        sb.set_free_list_head(recycled.get_free_list_pointer());
        sb.set_free_list_length(sb.free_list_length() - 1);
        write_sysbucket(cache, file_id, &sb, wal)?;
        trace!("allocator: reused bucket {head:?} from free list (ratio {ratio:.2})");
        return Ok(head);
    }

    let current = sb.free_space_pointer();
    let next_offset = current.page_offset as usize + config.max_bucket_size_bytes;
    if next_offset > config.page_size {
        let new_page = cache.add_page(file_id)?;
        let allocated = BucketPointer::new(new_page.page_index(), 0);
        sb.set_free_space_pointer(BucketPointer::new(new_page.page_index(), config.max_bucket_size_bytes as i32));
        write_sysbucket(cache, file_id, &sb, wal)?;
        trace!("allocator: bumped onto new page, allocated {allocated:?}");
        Ok(allocated)
    } else {
        sb.set_free_space_pointer(BucketPointer::new(current.page_index, next_offset as i32));
        write_sysbucket(cache, file_id, &sb, wal)?;
        trace!("allocator: bumped free-space pointer, allocated {current:?}");
        Ok(current)
    }
}

/// Collect every child pointer of a branch bucket, in left-to-right order,
/// accounting for the shared-child layout (`n` entries describe `n+1`
/// children).
fn children_of(bucket: &Bucket) -> Vec<BucketPointer> {
    if bucket.is_leaf() || bucket.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(bucket.size() + 1);
    out.push(bucket.get_entry(0).left_child());
    for i in 0..bucket.size() {
        out.push(bucket.get_entry(i).right_child());
    }
    out
}

/// `recycle`: mass-frees every bucket reachable from `roots` (inclusive),
/// splicing the freed chain onto the system bucket's free list.
///
/// The chain is built by processing `roots`/descendants in FIFO order and
/// linking each processed bucket's `free_list_pointer` back to whichever
/// bucket was the local chain head *before* it was processed. That makes
/// the very first bucket dequeued (typically the subtree root) the tail
/// of the new chain — the one bucket that must be spliced onto the old
/// `free_list_head` — which is exactly what a pre-dequeue peek at the
/// front of the queue would observe, so processing in encounter order is
/// sufficient; no bucket is ever revisited since the tree is acyclic.
pub(crate) fn recycle(
    cache: &dyn PageCache,
    file_id: FileId,
    config: &BonsaiConfig,
    roots: Vec<BucketPointer>,
    wal: &dyn AtomicOperationManager,
) -> Result<()> {
    let mut queue: VecDeque<BucketPointer> = roots.into_iter().filter(BucketPointer::is_valid).collect();
    let mut local_head = BucketPointer::NULL;
    let mut processed: Vec<BucketPointer> = Vec::new();

    while let Some(ptr) = queue.pop_front() {
        let bucket = read_bucket_at(cache, file_id, ptr, config.max_bucket_size_bytes)?;
        if bucket.is_deleted() {
            continue;
        }
        for child in children_of(&bucket) {
            if child.is_valid() {
                queue.push_back(child);
            }
        }

        let mut freed = Bucket::new_leaf(bucket.key_serializer_id(), bucket.value_serializer_id());
        freed.set_deleted(true);
        freed.set_free_list_pointer(local_head);
        write_bucket_at(cache, file_id, ptr, &freed, config.max_bucket_size_bytes, wal)?;

        local_head = ptr;
        processed.push(ptr);
    }

    if processed.is_empty() {
        return Ok(());
    }

    let new_head = *processed.last().unwrap();
    let tail = processed[0];

    let mut sb = read_sysbucket(cache, file_id)?;
    let old_head = sb.free_list_head();

    let mut tail_bucket = read_bucket_at(cache, file_id, tail, config.max_bucket_size_bytes)?;
    tail_bucket.set_free_list_pointer(old_head);
    write_bucket_at(cache, file_id, tail, &tail_bucket, config.max_bucket_size_bytes, wal)?;

    sb.set_free_list_head(new_head);
    sb.set_free_list_length(sb.free_list_length() + processed.len() as u64);
    write_sysbucket(cache, file_id, &sb, wal)?;

    trace!("allocator: recycled {} buckets, new free_list_head {new_head:?}", processed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryPageCache;
    use crate::wal::InMemoryAtomicOperationManager;

    fn test_config() -> BonsaiConfig {
        BonsaiConfig {
            page_size: 1024,
            max_bucket_size_bytes: 256,
            free_space_reuse_trigger: 0.5,
        }
    }

    #[test]
    fn init_sysbucket_is_idempotent_and_first_page_is_zero() {
        let cache = InMemoryPageCache::new(1024);
        let wal = InMemoryAtomicOperationManager::new();
        let config = test_config();
        let file_id = cache.add_file("t.db").unwrap();
        init_sysbucket(&cache, file_id, &config, &wal).unwrap();
        init_sysbucket(&cache, file_id, &config, &wal).unwrap();
        assert_eq!(cache.filled_up_to(file_id).unwrap(), 1);
    }

    #[test]
    fn allocate_bumps_within_a_page_then_crosses_page_boundary() {
        let cache = InMemoryPageCache::new(1024);
        let wal = InMemoryAtomicOperationManager::new();
        let config = test_config();
        let file_id = cache.add_file("t.db").unwrap();
        init_sysbucket(&cache, file_id, &config, &wal).unwrap();

        // Page holds 4 slots of 256 bytes; slot 0 is the system bucket.
        let a = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        let b = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        let c = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        assert_eq!(a, BucketPointer::new(0, 256));
        assert_eq!(b, BucketPointer::new(0, 512));
        assert_eq!(c, BucketPointer::new(0, 768));

        // Next allocation must cross onto a new page.
        let d = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        assert_eq!(d, BucketPointer::new(1, 0));
        assert_eq!(cache.filled_up_to(file_id).unwrap(), 2);
    }

    #[test]
    fn recycle_then_reuse_from_free_list() {
        let cache = InMemoryPageCache::new(1024);
        let wal = InMemoryAtomicOperationManager::new();
        let config = test_config();
        let file_id = cache.add_file("t.db").unwrap();
        init_sysbucket(&cache, file_id, &config, &wal).unwrap();

        let a = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        let leaf = Bucket::new_leaf(1, 2);
        write_bucket_at(&cache, file_id, a, &leaf, config.max_bucket_size_bytes, &wal).unwrap();

        recycle(&cache, file_id, &config, vec![a], &wal).unwrap();
        let sb = read_sysbucket(&cache, file_id).unwrap();
        assert_eq!(sb.free_list_length(), 1);
        assert_eq!(sb.free_list_head(), a);

        // Force the reuse path regardless of ratio to confirm detach logic.
        let mut forced = sb;
        forced.set_free_list_length(1_000_000);
        write_sysbucket(&cache, file_id, &forced, &wal).unwrap();

        let reused = allocate_bucket(&cache, file_id, &config, &wal).unwrap();
        assert_eq!(reused, a);
        let sb_after = read_sysbucket(&cache, file_id).unwrap();
        assert_eq!(sb_after.free_list_length(), 999_999);
    }
}
