//! Content-addressed object store
//!
//! The trie only ever talks to a [`ContentAddressedStore`]. Two backends are
//! provided: an in-memory map and a single-file store whose blobs are
//! addressed by their BLAKE3 hash and compressed with zstd.

mod blob;
mod file_store;
mod memory;

pub use blob::{Blob, BlobType};
pub use file_store::ObjectStore;
pub use memory::MemoryStore;

use crate::model::Hash;
use crate::Result;

/// A put/get/remove-by-digest blob service
pub trait ContentAddressedStore {
    /// Store a blob and return its digest. Storing identical bytes twice
    /// yields the same digest.
    fn put(&self, data: &[u8]) -> Result<Hash>;

    /// Fetch a blob. Fails with `NotFound` if the digest is unknown.
    fn get(&self, hash: &Hash) -> Result<Vec<u8>>;

    /// Best-effort delete. Unknown digests are not an error.
    fn remove(&self, hash: &Hash) -> Result<()>;

    fn contains(&self, hash: &Hash) -> Result<bool> {
        match self.get(hash) {
            Ok(_) => Ok(true),
            Err(crate::Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<S: ContentAddressedStore + ?Sized> ContentAddressedStore for &S {
    fn put(&self, data: &[u8]) -> Result<Hash> {
        (**self).put(data)
    }

    fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        (**self).get(hash)
    }

    fn remove(&self, hash: &Hash) -> Result<()> {
        (**self).remove(hash)
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        (**self).contains(hash)
    }
}
