//!
//! Shared helpers: byte-cursor encode/decode primitives used by the bucket
//! codec and system bucket, plus crate-wide types and the bucket pointer.
//!

pub mod pointer;
pub mod types;

pub use pointer::BucketPointer;
pub use types::{BonsaiConfig, FileId, TxId};

/// A small append-only byte writer used by the bucket/system-bucket codecs.
/// Keeps field encode order explicit and in one place rather than scattered
/// `copy_from_slice` calls.
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_pointer(&mut self, p: BucketPointer) {
        self.put_i64(p.page_index);
        self.put_i32(p.page_offset);
    }

    pub(crate) fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// A cursor over a borrowed byte slice, the read-side counterpart of
/// [`ByteWriter`]. Every `get_*` call panics-via-`Err` on truncated input
/// rather than panicking the process — malformed bytes surface as
/// [`crate::errors::BonsaiError::Corruption`].
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> crate::errors::Result<()> {
        if self.pos + n > self.buf.len() {
            return Err(crate::errors::BonsaiError::Corruption(format!(
                "truncated bucket buffer: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn get_u8(&mut self) -> crate::errors::Result<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn get_u16(&mut self) -> crate::errors::Result<u16> {
        self.need(2)?;
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    pub(crate) fn get_u32(&mut self) -> crate::errors::Result<u32> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn get_u64(&mut self) -> crate::errors::Result<u64> {
        self.need(8)?;
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub(crate) fn get_i64(&mut self) -> crate::errors::Result<i64> {
        self.need(8)?;
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub(crate) fn get_i32(&mut self) -> crate::errors::Result<i32> {
        self.need(4)?;
        let v = i32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn get_pointer(&mut self) -> crate::errors::Result<BucketPointer> {
        let page_index = self.get_i64()?;
        let page_offset = self.get_i32()?;
        Ok(BucketPointer::new(page_index, page_offset))
    }

    pub(crate) fn get_bytes(&mut self) -> crate::errors::Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}
