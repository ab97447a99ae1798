//! Error kinds surfaced by the bonsai tree engine: storage I/O failures
//! are rolled back before surfacing, corruption marks an invariant
//! violated on decode, usage errors mark caller misuse (descending scans,
//! ops on a closed tree), and unsupported marks a codec id the current
//! binary doesn't know about.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BonsaiError {
    /// Any cache/WAL I/O failure. The atomic operation is rolled back
    /// before this is surfaced to the caller.
    #[error("storage io error: {0}")]
    StorageIo(String),

    /// An invariant was violated while decoding a bucket or system bucket:
    /// an impossible offset, a `deleted` bucket reached via a live pointer,
    /// or a size field out of range.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Caller misuse: a descending range scan, an operation on a closed or
    /// deleted tree, or a split attempted on a bucket that cannot hold a
    /// single-entry branch (a misconfigured `max_bucket_size_bytes`).
    #[error("usage error: {0}")]
    Usage(String),

    /// A key or value serializer id recorded in a root bucket is unknown
    /// to the current binary.
    #[error("unsupported serializer id: {0}")]
    Unsupported(u8),

    /// A lock used by the concurrency envelope was found poisoned.
    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<io::Error> for BonsaiError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::StorageIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BonsaiError>;
