//! In-memory store, used for tests and throwaway indexes

use super::ContentAddressedStore;
use crate::model::Hash;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A `ContentAddressedStore` backed by a hash map
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ContentAddressedStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<Hash> {
        let hash = Hash::digest(data);
        self.blobs
            .write()
            .entry(hash)
            .or_insert_with(|| data.to_vec());
        Ok(hash)
    }

    fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))
    }

    fn remove(&self, hash: &Hash) -> Result<()> {
        self.blobs.write().remove(hash);
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.blobs.read().contains_key(hash))
    }
}
