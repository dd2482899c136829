//! Content-addressed CHAMP hash trie
//!
//! This implements a persistent hash trie where:
//! - Keys are placed by successive `bit_width`-bit slices of their hash
//! - Each node is stored under the digest of its canonical encoding
//! - Unchanged subtrees share storage across versions
//! - The shape depends only on the key/value set, so the root digest
//!   identifies the contents regardless of insertion order

mod bits;
mod codec;
mod hasher;
mod node;
mod tree;

#[cfg(test)]
mod proptests;

pub use bits::{extract_bits, Bitmap};
pub use codec::{decode, encode, MAX_NODE_BYTES};
pub use hasher::{Blake3KeyHasher, KeyHash, KeyHasher, KEY_HASH_BITS, KEY_HASH_LEN};
pub use node::{ChampNode, Mapping, Payload, PutOutcome, RemoveOutcome, TrieEnv};
pub use tree::Champ;
