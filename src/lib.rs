//! A persistent, disk-resident, ordered key-value index optimized for
//! hosting many small indexes inside one physical file. Unlike a
//! conventional B+tree whose node occupies a whole page, a bucket here
//! occupies only a subpage, so a single file can host hundreds of
//! independent trees without paying one-page-per-tree overhead.
//!
//! The page cache and the write-ahead log are treated as external
//! collaborators (see [`cache`] and [`wal`]); this crate ships in-memory
//! reference implementations of both so [`tree::Tree`] is usable and
//! testable on its own.

pub mod allocator;
pub mod bucket;
pub mod cache;
pub mod codec;
pub mod common;
pub mod errors;
pub mod lock;
pub mod page;
pub mod ridbag;
pub mod sysbucket;
pub mod testing;
pub mod tree;

pub use bucket::{Bucket, BucketEntry, UpdateResult};
pub use codec::{FixedI64Codec, FixedU64Codec, LengthPrefixedCodec, Serializer};
pub use common::{BonsaiConfig, BucketPointer, FileId, TxId};
pub use errors::{BonsaiError, Result};
pub use ridbag::get_real_bag_size;
pub use tree::Tree;
