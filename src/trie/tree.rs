//! Root-tracking handle over a CHAMP trie

use super::hasher::{Blake3KeyHasher, KeyHasher};
use super::node::{ChampNode, PutOutcome, RemoveOutcome, TrieEnv};
use crate::config::ChampConfig;
use crate::model::Hash;
use crate::ops::{diff_iter, DiffIter};
use crate::store::ContentAddressedStore;
use crate::Result;
use std::sync::Arc;

/// A persistent hash trie bound to a store
///
/// The handle owns one piece of mutable state, the current root. Every
/// successful put or remove stores the new path and moves the root; older
/// roots stay valid and share all untouched subtrees.
pub struct Champ<'a, S: ContentAddressedStore + ?Sized> {
    store: &'a S,
    hasher: Arc<dyn KeyHasher>,
    config: ChampConfig,
    /// Root node (cached in memory)
    root: ChampNode,
    root_hash: Hash,
}

impl<'a, S: ContentAddressedStore + ?Sized> Champ<'a, S> {
    /// Create an empty trie, storing its root
    pub fn create(store: &'a S, config: ChampConfig) -> Result<Self> {
        config.validate()?;
        let root = ChampNode::empty();
        let root_hash = root.save(store)?;
        Ok(Champ {
            store,
            hasher: Arc::new(Blake3KeyHasher),
            config,
            root,
            root_hash,
        })
    }

    /// Open the trie rooted at `root`
    pub fn load(store: &'a S, root: Hash, config: ChampConfig) -> Result<Self> {
        config.validate()?;
        let node = ChampNode::load(store, &root)?;
        Ok(Champ {
            store,
            hasher: Arc::new(Blake3KeyHasher),
            config,
            root: node,
            root_hash: root,
        })
    }

    /// Replace the key hasher. Must match whatever built the current root.
    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn root(&self) -> Hash {
        self.root_hash
    }

    pub fn root_node(&self) -> &ChampNode {
        &self.root
    }

    pub fn config(&self) -> ChampConfig {
        self.config
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn hasher(&self) -> Arc<dyn KeyHasher> {
        Arc::clone(&self.hasher)
    }

    fn env(&self) -> TrieEnv<'_, S> {
        TrieEnv {
            store: self.store,
            hasher: self.hasher.as_ref(),
            config: self.config,
        }
    }

    /// Look up a key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = self.hasher.hash_key(key);
        self.root.get(key, &hash, 0, &self.env())
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Set `key` to `value` if its current value is `expected` (`None` for
    /// a key not yet present). Returns the new root.
    #[tracing::instrument(level = "debug", skip_all, fields(root = %self.root_hash.short()))]
    pub fn put(&mut self, key: &[u8], expected: Option<&[u8]>, value: &[u8]) -> Result<Hash> {
        let hash = self.hasher.hash_key(key);
        let outcome = self
            .root
            .put(key, &hash, 0, expected, Some(value.to_vec()), &self.env())?;
        if let PutOutcome::Stored(root, root_hash) = outcome {
            self.root = root;
            self.root_hash = root_hash;
        }
        Ok(self.root_hash)
    }

    /// Remove `key`. If present, its value must equal `expected`. Removing
    /// an absent key leaves the root as is.
    #[tracing::instrument(level = "debug", skip_all, fields(root = %self.root_hash.short()))]
    pub fn remove(&mut self, key: &[u8], expected: Option<&[u8]>) -> Result<Hash> {
        let hash = self.hasher.hash_key(key);
        match self.root.remove(key, &hash, 0, expected, &self.env())? {
            RemoveOutcome::Unchanged => {}
            RemoveOutcome::Replaced(root, root_hash) => {
                self.root = root;
                self.root_hash = root_hash;
            }
            RemoveOutcome::InlineIntoParent(_) => {
                return Err(crate::Error::InvariantViolation(
                    "root asked to inline into a parent".into(),
                ))
            }
        }
        Ok(self.root_hash)
    }

    /// Number of keys
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn size(&self) -> Result<u64> {
        self.root.size(0, &self.env())
    }

    /// Visit every mapping in bucket order (by hash prefix, not by key)
    pub fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], Option<&[u8]>),
    {
        self.root.for_each(&self.env(), &mut visit)
    }

    /// All present key/value pairs in traversal order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.for_each(|k, v| {
            if let Some(v) = v {
                out.push((k.to_vec(), v.to_vec()));
            }
        })?;
        Ok(out)
    }

    /// Keys whose values differ between `old_root` (`None` = empty) and the
    /// current root
    pub fn changes_since(&self, old_root: Option<Hash>) -> DiffIter<'a, S> {
        diff_iter(
            self.store,
            self.hasher(),
            self.config,
            old_root,
            Some(self.root_hash),
        )
    }
}
