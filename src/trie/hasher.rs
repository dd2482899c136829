//! Key hashing

/// Fixed-length digest of a raw key, consumed `bit_width` bits per level
pub type KeyHash = [u8; KEY_HASH_LEN];

pub const KEY_HASH_LEN: usize = 32;

/// Bits available for bucket selection before keys can no longer be told apart
pub const KEY_HASH_BITS: usize = KEY_HASH_LEN * 8;

/// Maps raw keys to the hash that decides their position in the trie
///
/// Every handle touching a given root must use the same hasher.
pub trait KeyHasher: Send + Sync {
    fn hash_key(&self, key: &[u8]) -> KeyHash;
}

/// BLAKE3 over the raw key bytes
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3KeyHasher;

impl KeyHasher for Blake3KeyHasher {
    fn hash_key(&self, key: &[u8]) -> KeyHash {
        *blake3::hash(key).as_bytes()
    }
}
