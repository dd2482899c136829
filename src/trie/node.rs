//! CHAMP node and its persistent update algorithms
//!
//! A node maps each `bit_width`-bit slice of a key hash (a bucket) to either
//! an inline value bucket of up to `max_collisions` sorted mappings, or a
//! link to a deeper node. Occupied buckets are tracked in two disjoint
//! bitmaps; the packed `contents` holds value buckets first (by `data_map`
//! rank) and links last (by `node_map` rank, counted from the end).
//!
//! Nodes are never mutated. Every change builds a new node, stores it, and
//! hands back its digest so the parent can relink.

use super::bits::{extract_bits, Bitmap};
use super::codec;
use super::hasher::{KeyHash, KeyHasher, KEY_HASH_BITS};
use crate::config::ChampConfig;
use crate::model::Hash;
use crate::store::ContentAddressedStore;
use crate::{Error, Result};

/// A key and its (possibly absent) value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// What a bucket holds
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Mappings sharing this hash prefix, sorted by key
    Bucket(Vec<Mapping>),
    /// Digest of the node holding the longer prefixes
    Link(Hash),
}

/// Everything a node operation needs besides the node itself
pub struct TrieEnv<'a, S: ?Sized> {
    pub store: &'a S,
    pub hasher: &'a dyn KeyHasher,
    pub config: ChampConfig,
}

impl<S: ?Sized> Clone for TrieEnv<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for TrieEnv<'_, S> {}

/// Result of a put below some node
#[derive(Debug)]
pub enum PutOutcome {
    /// Nothing changed; the caller keeps its digest
    Unchanged,
    /// The node was rewritten and stored under the given digest
    Stored(ChampNode, Hash),
}

/// Result of a remove below some node
#[derive(Debug)]
pub enum RemoveOutcome {
    /// Key absent; the caller keeps its digest
    Unchanged,
    /// The node was rewritten and stored under the given digest
    Replaced(ChampNode, Hash),
    /// A non-root node shrank to at most `max_collisions` keys and no
    /// links. It is not stored; the parent takes these (sorted) mappings
    /// as one value bucket, or drops the slot when the list is empty.
    InlineIntoParent(Vec<Mapping>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChampNode {
    data_map: Bitmap,
    node_map: Bitmap,
    contents: Vec<Payload>,
}

impl ChampNode {
    pub fn empty() -> Self {
        ChampNode::default()
    }

    /// Assemble a node from its packed representation, checking structure.
    pub fn from_parts(data_map: Bitmap, node_map: Bitmap, contents: Vec<Payload>) -> Result<Self> {
        let node = ChampNode {
            data_map,
            node_map,
            contents,
        };
        node.check_structure().map_err(Error::MalformedNode)?;
        Ok(node)
    }

    pub(crate) fn parts(&self) -> (Bitmap, Bitmap, &[Payload]) {
        (self.data_map, self.node_map, &self.contents)
    }

    fn check_structure(&self) -> std::result::Result<(), String> {
        if self.data_map.intersects(self.node_map) {
            return Err("bucket is both inline and a child".into());
        }
        let data_count = self.data_map.count();
        if self.contents.len() != data_count + self.node_map.count() {
            return Err(format!(
                "{} slots for {} data and {} node buckets",
                self.contents.len(),
                data_count,
                self.node_map.count()
            ));
        }
        for (i, payload) in self.contents.iter().enumerate() {
            match (payload, i < data_count) {
                (Payload::Bucket(mappings), true) => {
                    if mappings.is_empty() {
                        return Err(format!("value bucket {} is empty", i));
                    }
                    if mappings.windows(2).any(|w| w[0].key >= w[1].key) {
                        return Err(format!("value bucket {} is not strictly sorted", i));
                    }
                }
                (Payload::Link(_), false) => {}
                (Payload::Link(_), true) => return Err(format!("link in data slot {}", i)),
                (Payload::Bucket(_), false) => return Err(format!("value bucket in link slot {}", i)),
            }
        }
        Ok(())
    }

    /// Fetch and decode a node
    pub fn load<S: ContentAddressedStore + ?Sized>(store: &S, hash: &Hash) -> Result<Self> {
        let bytes = store.get(hash)?;
        tracing::trace!(%hash, bytes = bytes.len(), "loaded node");
        codec::decode(&bytes)
    }

    /// Encode and store this node, returning its digest
    pub fn save<S: ContentAddressedStore + ?Sized>(&self, store: &S) -> Result<Hash> {
        let bytes = codec::encode(self)?;
        let hash = store.put(&bytes)?;
        tracing::trace!(%hash, bytes = bytes.len(), "stored node");
        Ok(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Keys held inline in this node
    pub fn key_count(&self) -> usize {
        self.buckets().map(<[Mapping]>::len).sum()
    }

    /// Child links of this node
    pub fn node_count(&self) -> usize {
        self.node_map.count()
    }

    /// The payload of bucket `bit`, if occupied
    pub fn payload_at(&self, bit: usize) -> Option<&Payload> {
        if self.data_map.get(bit) {
            Some(&self.contents[self.data_map.index(bit)])
        } else if self.node_map.get(bit) {
            Some(&self.contents[self.link_slot(bit)])
        } else {
            None
        }
    }

    /// Occupied buckets in ascending order
    pub fn occupied(&self) -> impl Iterator<Item = usize> {
        self.data_map.union(self.node_map).iter()
    }

    fn buckets(&self) -> impl Iterator<Item = &[Mapping]> {
        self.contents.iter().filter_map(|p| match p {
            Payload::Bucket(m) => Some(m.as_slice()),
            Payload::Link(_) => None,
        })
    }

    fn links(&self) -> impl Iterator<Item = &Hash> {
        self.contents.iter().filter_map(|p| match p {
            Payload::Link(h) => Some(h),
            Payload::Bucket(_) => None,
        })
    }

    fn link_slot(&self, bit: usize) -> usize {
        self.contents.len() - 1 - self.node_map.index(bit)
    }

    fn bucket(&self, index: usize) -> Result<&Vec<Mapping>> {
        match &self.contents[index] {
            Payload::Bucket(m) => Ok(m),
            Payload::Link(_) => Err(Error::InvariantViolation(format!(
                "data slot {} holds a link",
                index
            ))),
        }
    }

    fn link(&self, bit: usize) -> Result<Hash> {
        match &self.contents[self.link_slot(bit)] {
            Payload::Link(h) => Ok(*h),
            Payload::Bucket(_) => Err(Error::InvariantViolation(format!(
                "link slot for bucket {} holds values",
                bit
            ))),
        }
    }

    // === Lookup ===

    pub fn get<S: ContentAddressedStore + ?Sized>(
        &self,
        key: &[u8],
        hash: &KeyHash,
        depth: usize,
        env: &TrieEnv<'_, S>,
    ) -> Result<Option<Vec<u8>>> {
        let bit = extract_bits(hash, depth, env.config.bit_width);

        if self.data_map.get(bit) {
            let bucket = self.bucket(self.data_map.index(bit))?;
            return Ok(bucket
                .iter()
                .find(|m| m.key == key)
                .and_then(|m| m.value.clone()));
        }

        if self.node_map.get(bit) {
            let child = ChampNode::load(env.store, &self.link(bit)?)?;
            return child.get(key, hash, depth + 1, env);
        }

        Ok(None)
    }

    // === Insert / update ===

    /// Map `key` to `value`. The current value must equal `expected`
    /// (`None` meaning the key is absent).
    #[allow(clippy::too_many_arguments)]
    pub fn put<S: ContentAddressedStore + ?Sized>(
        &self,
        key: &[u8],
        hash: &KeyHash,
        depth: usize,
        expected: Option<&[u8]>,
        value: Option<Vec<u8>>,
        env: &TrieEnv<'_, S>,
    ) -> Result<PutOutcome> {
        let bit = extract_bits(hash, depth, env.config.bit_width);

        if self.data_map.get(bit) {
            let index = self.data_map.index(bit);
            let bucket = self.bucket(index)?;

            if let Some(pos) = bucket.iter().position(|m| m.key == key) {
                let current = bucket[pos].value.as_deref();
                if current != expected {
                    return Err(Error::concurrent(key, expected, current));
                }
                if current == value.as_deref() {
                    return Ok(PutOutcome::Unchanged);
                }
                return self.copy_and_set_value(index, pos, value).stored(env);
            }

            if expected.is_some() {
                return Err(Error::concurrent(key, expected, None));
            }

            let mapping = Mapping {
                key: key.to_vec(),
                value,
            };
            if bucket.len() < env.config.max_collisions {
                return self.insert_into_bucket(index, mapping).stored(env);
            }

            let child_hash = push_down(bucket, mapping, hash, depth + 1, env)?;
            return self.migrate_inline_to_link(bit, child_hash).stored(env);
        }

        if self.node_map.get(bit) {
            let child = ChampNode::load(env.store, &self.link(bit)?)?;
            return match child.put(key, hash, depth + 1, expected, value, env)? {
                PutOutcome::Unchanged => Ok(PutOutcome::Unchanged),
                PutOutcome::Stored(_, child_hash) => {
                    self.overwrite_link(bit, child_hash).stored(env)
                }
            };
        }

        if expected.is_some() {
            return Err(Error::concurrent(key, expected, None));
        }
        self.add_bucket(
            bit,
            Mapping {
                key: key.to_vec(),
                value,
            },
        )
        .stored(env)
    }

    fn stored<S: ContentAddressedStore + ?Sized>(self, env: &TrieEnv<'_, S>) -> Result<PutOutcome> {
        let hash = self.save(env.store)?;
        Ok(PutOutcome::Stored(self, hash))
    }

    // === Removal ===

    /// Remove `key` if present. A present key's value must equal `expected`.
    pub fn remove<S: ContentAddressedStore + ?Sized>(
        &self,
        key: &[u8],
        hash: &KeyHash,
        depth: usize,
        expected: Option<&[u8]>,
        env: &TrieEnv<'_, S>,
    ) -> Result<RemoveOutcome> {
        let bit = extract_bits(hash, depth, env.config.bit_width);

        if self.data_map.get(bit) {
            let index = self.data_map.index(bit);
            let bucket = self.bucket(index)?;
            let Some(pos) = bucket.iter().position(|m| m.key == key) else {
                return Ok(RemoveOutcome::Unchanged);
            };
            let current = bucket[pos].value.as_deref();
            if current != expected {
                return Err(Error::concurrent(key, expected, current));
            }
            return self.remove_mapping(bit, index, pos).settle(depth, env);
        }

        if self.node_map.get(bit) {
            let child = ChampNode::load(env.store, &self.link(bit)?)?;
            let updated = match child.remove(key, hash, depth + 1, expected, env)? {
                RemoveOutcome::Unchanged => return Ok(RemoveOutcome::Unchanged),
                RemoveOutcome::Replaced(_, child_hash) => self.overwrite_link(bit, child_hash),
                RemoveOutcome::InlineIntoParent(mappings) if mappings.is_empty() => {
                    self.remove_link(bit)
                }
                RemoveOutcome::InlineIntoParent(mappings) => {
                    tracing::debug!(depth, bucket = bit, keys = mappings.len(), "inlining child");
                    self.migrate_link_to_inline(bit, mappings)
                }
            };
            return updated.settle(depth, env);
        }

        Ok(RemoveOutcome::Unchanged)
    }

    /// Decide whether a node left by a removal stays a node or folds into
    /// its parent. Applied at every level on the way up, so a fold can
    /// cascade as far as the root.
    fn settle<S: ContentAddressedStore + ?Sized>(
        self,
        depth: usize,
        env: &TrieEnv<'_, S>,
    ) -> Result<RemoveOutcome> {
        if depth > 0 && self.node_count() == 0 && self.key_count() <= env.config.max_collisions {
            let mut mappings: Vec<Mapping> = self
                .contents
                .into_iter()
                .flat_map(|p| match p {
                    Payload::Bucket(m) => m,
                    Payload::Link(_) => Vec::new(),
                })
                .collect();
            mappings.sort_by(|a, b| a.key.cmp(&b.key));
            return Ok(RemoveOutcome::InlineIntoParent(mappings));
        }
        let hash = self.save(env.store)?;
        Ok(RemoveOutcome::Replaced(self, hash))
    }

    // === Aggregates ===

    /// Total keys in this subtree
    pub fn size<S: ContentAddressedStore + ?Sized>(
        &self,
        depth: usize,
        env: &TrieEnv<'_, S>,
    ) -> Result<u64> {
        let mut total = self.key_count() as u64;
        for link in self.links() {
            total += ChampNode::load(env.store, link)?.size(depth + 1, env)?;
        }
        Ok(total)
    }

    /// Visit every mapping, bucket by bucket in ascending bucket order,
    /// descending into links as they are met.
    pub fn for_each<S, F>(&self, env: &TrieEnv<'_, S>, visit: &mut F) -> Result<()>
    where
        S: ContentAddressedStore + ?Sized,
        F: FnMut(&[u8], Option<&[u8]>),
    {
        for bit in self.occupied() {
            match self.payload_at(bit) {
                Some(Payload::Bucket(mappings)) => {
                    for m in mappings {
                        visit(&m.key, m.value.as_deref());
                    }
                }
                Some(Payload::Link(hash)) => {
                    ChampNode::load(env.store, hash)?.for_each(env, visit)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    // === Copy-on-write helpers ===

    fn copy_and_set_value(&self, index: usize, pos: usize, value: Option<Vec<u8>>) -> ChampNode {
        let mut node = self.clone();
        if let Payload::Bucket(mappings) = &mut node.contents[index] {
            mappings[pos].value = value;
        }
        node
    }

    fn insert_into_bucket(&self, index: usize, mapping: Mapping) -> ChampNode {
        let mut node = self.clone();
        if let Payload::Bucket(mappings) = &mut node.contents[index] {
            let at = mappings.partition_point(|m| m.key < mapping.key);
            mappings.insert(at, mapping);
        }
        node
    }

    fn add_bucket(&self, bit: usize, mapping: Mapping) -> ChampNode {
        let mut node = self.clone();
        node.contents
            .insert(self.data_map.index(bit), Payload::Bucket(vec![mapping]));
        node.data_map.set(bit);
        node
    }

    fn remove_mapping(&self, bit: usize, index: usize, pos: usize) -> ChampNode {
        let mut node = self.clone();
        let emptied = match &mut node.contents[index] {
            Payload::Bucket(mappings) => {
                mappings.remove(pos);
                mappings.is_empty()
            }
            Payload::Link(_) => false,
        };
        if emptied {
            node.contents.remove(index);
            node.data_map.clear(bit);
        }
        node
    }

    fn migrate_inline_to_link(&self, bit: usize, child: Hash) -> ChampNode {
        let mut node = self.clone();
        node.contents.remove(self.data_map.index(bit));
        node.data_map.clear(bit);
        // slot computed on the shrunk array, before the bit is set
        let slot = node.contents.len() - node.node_map.index(bit);
        node.contents.insert(slot, Payload::Link(child));
        node.node_map.set(bit);
        node
    }

    fn migrate_link_to_inline(&self, bit: usize, mappings: Vec<Mapping>) -> ChampNode {
        let mut node = self.clone();
        node.contents.remove(self.link_slot(bit));
        node.node_map.clear(bit);
        node.contents
            .insert(node.data_map.index(bit), Payload::Bucket(mappings));
        node.data_map.set(bit);
        node
    }

    fn overwrite_link(&self, bit: usize, child: Hash) -> ChampNode {
        let mut node = self.clone();
        let slot = self.link_slot(bit);
        node.contents[slot] = Payload::Link(child);
        node
    }

    fn remove_link(&self, bit: usize) -> ChampNode {
        let mut node = self.clone();
        node.contents.remove(self.link_slot(bit));
        node.node_map.clear(bit);
        node
    }
}

/// Replace an over-full bucket by a child node one level deeper holding the
/// bucket's mappings plus the new one. Returns the child's digest.
fn push_down<S: ContentAddressedStore + ?Sized>(
    existing: &[Mapping],
    new: Mapping,
    new_hash: &KeyHash,
    depth: usize,
    env: &TrieEnv<'_, S>,
) -> Result<Hash> {
    if depth * env.config.bit_width as usize >= KEY_HASH_BITS {
        return Err(Error::HashCollisionExhausted { depth });
    }
    tracing::debug!(depth, keys = existing.len() + 1, "pushing bucket down");

    let mut child = ChampNode::empty();
    let mut child_hash = None;
    let rehashed = existing
        .iter()
        .map(|m| (env.hasher.hash_key(&m.key), m.clone()));
    for (key_hash, mapping) in std::iter::once((*new_hash, new)).chain(rehashed) {
        if let PutOutcome::Stored(node, digest) =
            child.put(&mapping.key, &key_hash, depth, None, mapping.value, env)?
        {
            child = node;
            child_hash = Some(digest);
        }
    }
    child_hash.ok_or_else(|| Error::InvariantViolation("pushed-down node stayed empty".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::trie::hasher::KEY_HASH_LEN;

    /// Uses the key bytes themselves as the hash, so tests pick buckets directly.
    struct IdentityHasher;

    impl KeyHasher for IdentityHasher {
        fn hash_key(&self, key: &[u8]) -> KeyHash {
            let mut out = [0u8; KEY_HASH_LEN];
            let n = key.len().min(KEY_HASH_LEN);
            out[..n].copy_from_slice(&key[..n]);
            out
        }
    }

    fn env(store: &MemoryStore) -> TrieEnv<'_, MemoryStore> {
        TrieEnv {
            store,
            hasher: &IdentityHasher,
            config: ChampConfig::new(5, 2).unwrap(),
        }
    }

    fn put(node: &ChampNode, key: &[u8], value: &[u8], env: &TrieEnv<'_, MemoryStore>) -> ChampNode {
        let hash = env.hasher.hash_key(key);
        match node.put(key, &hash, 0, None, Some(value.to_vec()), env).unwrap() {
            PutOutcome::Stored(n, _) => n,
            PutOutcome::Unchanged => node.clone(),
        }
    }

    #[test]
    fn test_put_keeps_bucket_sorted() {
        let store = MemoryStore::new();
        let env = env(&store);
        // both keys land in bucket 1 at depth 0
        let node = put(&ChampNode::empty(), &[1, 9], b"b", &env);
        let node = put(&node, &[1, 2], b"a", &env);

        match node.payload_at(1) {
            Some(Payload::Bucket(m)) => {
                assert_eq!(m[0].key, vec![1, 2]);
                assert_eq!(m[1].key, vec![1, 9]);
            }
            other => panic!("expected bucket, got {:?}", other),
        }
    }

    #[test]
    fn test_push_down_on_overflow() {
        let store = MemoryStore::new();
        let env = env(&store);
        let mut node = ChampNode::empty();
        for k in [[3u8, 0], [3, 1], [3, 2]] {
            node = put(&node, &k, b"v", &env);
        }
        assert_eq!(node.node_count(), 1);
        assert_eq!(node.key_count(), 0);
        assert!(matches!(node.payload_at(3), Some(Payload::Link(_))));
        for k in [[3u8, 0], [3, 1], [3, 2]] {
            let hash = env.hasher.hash_key(&k);
            assert_eq!(node.get(&k, &hash, 0, &env).unwrap(), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn test_links_and_buckets_share_contents() {
        let store = MemoryStore::new();
        let env = env(&store);
        let mut node = ChampNode::empty();
        for k in [[3u8, 0], [3, 1], [3, 2], [0, 0], [31, 0]] {
            node = put(&node, &k, b"v", &env);
        }
        let (data_map, node_map, contents) = node.parts();
        assert_eq!(data_map.iter().collect::<Vec<_>>(), vec![0, 31]);
        assert_eq!(node_map.iter().collect::<Vec<_>>(), vec![3]);
        assert!(matches!(contents[2], Payload::Link(_)));
    }

    #[test]
    fn test_put_expected_mismatch() {
        let store = MemoryStore::new();
        let env = env(&store);
        let node = put(&ChampNode::empty(), b"k", b"1", &env);
        let hash = env.hasher.hash_key(b"k");

        let err = node
            .put(b"k", &hash, 0, Some(b"0"), Some(b"2".to_vec()), &env)
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentModification { .. }));

        let other = env.hasher.hash_key(b"q");
        let err = node
            .put(b"q", &other, 0, Some(b"0"), Some(b"2".to_vec()), &env)
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentModification { .. }));
    }

    #[test]
    fn test_push_down_exhausts_identical_hashes() {
        struct ConstantHasher;
        impl KeyHasher for ConstantHasher {
            fn hash_key(&self, _key: &[u8]) -> KeyHash {
                [0u8; KEY_HASH_LEN]
            }
        }

        let store = MemoryStore::new();
        let env = TrieEnv {
            store: &store,
            hasher: &ConstantHasher,
            config: ChampConfig::new(6, 1).unwrap(),
        };
        let hash = [0u8; KEY_HASH_LEN];
        let node = match ChampNode::empty()
            .put(b"a", &hash, 0, None, Some(b"1".to_vec()), &env)
            .unwrap()
        {
            PutOutcome::Stored(n, _) => n,
            PutOutcome::Unchanged => unreachable!(),
        };
        let err = node
            .put(b"b", &hash, 0, None, Some(b"2".to_vec()), &env)
            .unwrap_err();
        assert!(matches!(err, Error::HashCollisionExhausted { .. }));
    }

    #[test]
    fn test_remove_absent_is_unchanged() {
        let store = MemoryStore::new();
        let env = env(&store);
        let node = put(&ChampNode::empty(), b"k", b"1", &env);
        let hash = env.hasher.hash_key(b"x");
        assert!(matches!(
            node.remove(b"x", &hash, 0, None, &env).unwrap(),
            RemoveOutcome::Unchanged
        ));
    }

    #[test]
    fn test_child_folds_back_on_remove() {
        let store = MemoryStore::new();
        let env = env(&store);
        let mut node = ChampNode::empty();
        for k in [[3u8, 0], [3, 1], [3, 2]] {
            node = put(&node, &k, b"v", &env);
        }
        let hash = env.hasher.hash_key(&[3, 1]);
        let node = match node.remove(&[3, 1], &hash, 0, Some(b"v"), &env).unwrap() {
            RemoveOutcome::Replaced(n, _) => n,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(node.node_count(), 0);
        match node.payload_at(3) {
            Some(Payload::Bucket(m)) => {
                let keys: Vec<_> = m.iter().map(|m| m.key.clone()).collect();
                assert_eq!(keys, vec![vec![3, 0], vec![3, 2]]);
            }
            other => panic!("expected bucket, got {:?}", other),
        }
    }

    #[test]
    fn test_size_counts_children() {
        let store = MemoryStore::new();
        let env = env(&store);
        let mut node = ChampNode::empty();
        for k in [[3u8, 0], [3, 1], [3, 2], [4, 0]] {
            node = put(&node, &k, b"v", &env);
        }
        assert_eq!(node.size(0, &env).unwrap(), 4);
    }
}
