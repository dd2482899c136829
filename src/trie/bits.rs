//! Bucket bitmaps and hash bit extraction

use crate::{Error, Result};

/// Set of occupied buckets in a node (bit `i` = bucket `i`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bitmap(u64);

impl Bitmap {
    pub const EMPTY: Bitmap = Bitmap(0);

    pub fn get(&self, bit: usize) -> bool {
        bit < 64 && self.0 & (1u64 << bit) != 0
    }

    pub fn set(&mut self, bit: usize) {
        self.0 |= 1u64 << bit;
    }

    pub fn clear(&mut self, bit: usize) {
        self.0 &= !(1u64 << bit);
    }

    /// Number of set bits below `bit`, i.e. the packed position of `bit`
    pub fn index(&self, bit: usize) -> usize {
        (self.0 & ((1u64 << bit) - 1)).count_ones() as usize
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersects(&self, other: Bitmap) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(&self, other: Bitmap) -> Bitmap {
        Bitmap(self.0 | other.0)
    }

    /// Set bits in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..64).filter(move |b| bits & (1u64 << b) != 0)
    }

    /// Little-endian bytes with trailing zero bytes stripped; the empty
    /// set encodes as no bytes at all.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_le_bytes();
        let len = 8 - (self.0.leading_zeros() as usize / 8);
        bytes[..len].to_vec()
    }

    /// Inverse of [`Bitmap::to_bytes`]; rejects non-canonical forms.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 8 {
            return Err(Error::MalformedNode(format!(
                "bitmap of {} bytes exceeds 64 buckets",
                bytes.len()
            )));
        }
        if bytes.last() == Some(&0) {
            return Err(Error::MalformedNode(
                "bitmap has a trailing zero byte".into(),
            ));
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Bitmap(u64::from_le_bytes(buf)))
    }
}

/// Bucket index of `hash` at `depth`: the `bit_width`-bit window starting
/// at bit `depth * bit_width`, read little-endian within each byte and
/// zero-padded past the end of the hash.
pub fn extract_bits(hash: &[u8], depth: usize, bit_width: u8) -> usize {
    let nbits = bit_width as usize;
    let start = depth * nbits;
    let index = start / 8;
    let shift = start % 8;
    let low_bits = nbits.min(8 - shift);
    let high_bits = nbits - low_bits;

    let byte_at = |i: usize| hash.get(i).copied().unwrap_or(0) as usize;
    let low = (byte_at(index) >> shift) & ((1 << low_bits) - 1);
    let high = byte_at(index + 1) & ((1 << high_bits) - 1);
    low | (high << low_bits)
}
