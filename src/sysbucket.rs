//! The system bucket: per-file metadata living at the fixed address
//! `(page_index=0, page_offset=0)`. Every file that has ever hosted a
//! bonsai tree has exactly one, initialized on first use and shared by
//! every tree in that file.

use crate::common::{BucketPointer, ByteReader, ByteWriter};
use crate::errors::Result;

pub(crate) const SYSBUCKET_PAGE_INDEX: i64 = 0;
pub(crate) const SYSBUCKET_PAGE_OFFSET: i32 = 0;

/// `initialized(u8) + free_space_pointer(12) + free_list_head(12) +
/// free_list_length(u64)`.
pub(crate) const SYSBUCKET_SIZE: usize = 1 + 12 + 12 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemBucket {
    initialized: bool,
    free_space_pointer: BucketPointer,
    free_list_head: BucketPointer,
    free_list_length: u64,
}

impl SystemBucket {
    /// A fresh system bucket: nothing allocated yet, free space starts
    /// right after the system bucket's own slot (which occupies the first
    /// `max_bucket_size_bytes` bytes of page 0).
    pub fn fresh(max_bucket_size_bytes: usize) -> Self {
        Self {
            initialized: true,
            free_space_pointer: BucketPointer::new(
                SYSBUCKET_PAGE_INDEX,
                SYSBUCKET_PAGE_OFFSET + max_bucket_size_bytes as i32,
            ),
            free_list_head: BucketPointer::NULL,
            free_list_length: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn free_space_pointer(&self) -> BucketPointer {
        self.free_space_pointer
    }

    pub fn set_free_space_pointer(&mut self, p: BucketPointer) {
        self.free_space_pointer = p;
    }

    pub fn free_list_head(&self) -> BucketPointer {
        self.free_list_head
    }

    pub fn set_free_list_head(&mut self, p: BucketPointer) {
        self.free_list_head = p;
    }

    pub fn free_list_length(&self) -> u64 {
        self.free_list_length
    }

    pub fn set_free_list_length(&mut self, len: u64) {
        self.free_list_length = len;
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(SYSBUCKET_SIZE);
        w.put_u8(self.initialized as u8);
        w.put_pointer(self.free_space_pointer);
        w.put_pointer(self.free_list_head);
        w.put_u64(self.free_list_length);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let initialized = r.get_u8()? != 0;
        let free_space_pointer = r.get_pointer()?;
        let free_list_head = r.get_pointer()?;
        let free_list_length = r.get_u64()?;
        Ok(Self {
            initialized,
            free_space_pointer,
            free_list_head,
            free_list_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_system_bucket_points_past_itself() {
        let sb = SystemBucket::fresh(256);
        assert!(sb.is_initialized());
        assert_eq!(sb.free_space_pointer(), BucketPointer::new(0, 256));
        assert_eq!(sb.free_list_head(), BucketPointer::NULL);
        assert_eq!(sb.free_list_length(), 0);
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut sb = SystemBucket::fresh(256);
        sb.set_free_space_pointer(BucketPointer::new(4, 7));
        sb.set_free_list_head(BucketPointer::new(2, 3));
        sb.set_free_list_length(5);

        let bytes = sb.encode();
        let decoded = SystemBucket::decode(&bytes).unwrap();
        assert_eq!(decoded, sb);
    }
}
