//! Key/value codecs. The tree engine treats these as external
//! collaborators: each root bucket records a `key_serializer_id` and
//! `value_serializer_id` byte, and it is the caller's job to supply
//! matching [`Serializer`] implementations on `load`. Two concrete codecs
//! ship with the crate so it is usable out of the box; an application is
//! free to register its own ids.

use crate::errors::{BonsaiError, Result};

/// Converts a typed value to and from the byte strings stored in bucket
/// entries. `id()` is persisted in the root bucket so a tree reloaded later
/// can be checked against the serializer the caller passes to `load`.
pub trait Serializer<T>: Send + Sync {
    fn id(&self) -> u8;
    fn encode(&self, value: &T) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Fixed-width big-endian encoding for `u64` keys. Big-endian so that
/// unsigned byte-lexicographic comparison of the encoded form matches
/// numeric order, the way the key comparator assumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedU64Codec;

impl Serializer<u64> for FixedU64Codec {
    fn id(&self) -> u8 {
        1
    }

    fn encode(&self, value: &u64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BonsaiError::Corruption(format!("expected 8-byte key, got {}", bytes.len())))?;
        Ok(u64::from_be_bytes(arr))
    }
}

/// Length-prefix-free passthrough for byte-string keys/values; the bucket
/// codec already length-prefixes every entry, so this codec is the
/// identity function over `Vec<u8>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixedCodec;

impl Serializer<Vec<u8>> for LengthPrefixedCodec {
    fn id(&self) -> u8 {
        2
    }

    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Fixed-width big-endian encoding for signed 64-bit counters, the value
/// type the canonical "rid bag" client uses (see [`crate::ridbag`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedI64Codec;

impl Serializer<i64> for FixedI64Codec {
    fn id(&self) -> u8 {
        3
    }

    fn encode(&self, value: &i64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<i64> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BonsaiError::Corruption(format!("expected 8-byte value, got {}", bytes.len())))?;
        Ok(i64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_u64_round_trips_and_preserves_order() {
        let c = FixedU64Codec;
        let a = c.encode(&1u64);
        let b = c.encode(&2u64);
        assert!(a < b);
        assert_eq!(c.decode(&a).unwrap(), 1);
        assert_eq!(c.decode(&b).unwrap(), 2);
    }

    #[test]
    fn length_prefixed_is_identity() {
        let c = LengthPrefixedCodec;
        let v = b"hello".to_vec();
        assert_eq!(c.decode(&c.encode(&v)).unwrap(), v);
    }
}
