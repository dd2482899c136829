//! Trie Scenario Tests
//!
//! End-to-end behaviour of the CHAMP trie through its public handle, with a
//! key hasher that lets each test choose where keys land.
//!
//! Run with:
//! ```bash
//! cargo test --test trie_scenarios
//! ```

use nanopub_index::trie::{ChampNode, KeyHash, Payload, KEY_HASH_LEN};
use nanopub_index::{
    diff_trees, Blake3KeyHasher, Champ, ChampConfig, Error, KeyHasher, MemoryStore,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Hashes listed keys to chosen digests, everything else with BLAKE3
#[derive(Default)]
struct TableHasher {
    table: HashMap<Vec<u8>, KeyHash>,
}

impl TableHasher {
    /// Give `key` a hash whose first bytes are `prefix`, rest zero
    fn with(mut self, key: &str, prefix: &[u8]) -> Self {
        let mut hash = [0u8; KEY_HASH_LEN];
        hash[..prefix.len()].copy_from_slice(prefix);
        self.table.insert(key.as_bytes().to_vec(), hash);
        self
    }
}

impl KeyHasher for TableHasher {
    fn hash_key(&self, key: &[u8]) -> KeyHash {
        match self.table.get(key) {
            Some(hash) => *hash,
            None => Blake3KeyHasher.hash_key(key),
        }
    }
}

fn config() -> ChampConfig {
    ChampConfig::new(5, 3).unwrap()
}

fn champ_with<'a>(store: &'a MemoryStore, hasher: &Arc<TableHasher>) -> Champ<'a, MemoryStore> {
    Champ::create(store, config())
        .unwrap()
        .with_hasher(Arc::clone(hasher) as Arc<dyn KeyHasher>)
}

fn bucket_keys(node: &ChampNode, bit: usize) -> Option<Vec<String>> {
    match node.payload_at(bit) {
        Some(Payload::Bucket(mappings)) => Some(
            mappings
                .iter()
                .map(|m| String::from_utf8(m.key.clone()).unwrap())
                .collect(),
        ),
        _ => None,
    }
}

/// Four keys in depth-0 bucket 7, spread over distinct depth-1 buckets
fn push_down_hasher() -> TableHasher {
    TableHasher::default()
        .with("k0", &[7, 0])
        .with("k1", &[7, 1])
        .with("k2", &[7, 2])
        .with("k3", &[7, 3])
}

// ============================================================================
// Basic lifecycle
// ============================================================================

#[test]
fn test_put_overwrite_diff_remove() {
    let store = MemoryStore::new();
    let mut champ = Champ::create(&store, config()).unwrap();
    let empty = champ.root();

    let r1 = champ.put(b"a", None, b"1").unwrap();
    assert_eq!(champ.get(b"a").unwrap(), Some(b"1".to_vec()));

    let r2 = champ.put(b"a", Some(b"1"), b"2").unwrap();
    let diff = diff_trees(&store, champ.hasher(), config(), Some(r1), Some(r2)).unwrap();
    assert_eq!(diff.entries.len(), 1);
    assert_eq!(diff.entries[0].key, b"a".to_vec());
    assert_eq!(diff.entries[0].old, Some(b"1".to_vec()));
    assert_eq!(diff.entries[0].new, Some(b"2".to_vec()));

    let r3 = champ.remove(b"a", Some(b"2")).unwrap();
    assert_eq!(r3, empty);
}

#[test]
fn test_unchanged_value_shares_root() {
    let store = MemoryStore::new();
    let mut champ = Champ::create(&store, config()).unwrap();
    for i in 0..50 {
        champ.put(format!("np{}", i).as_bytes(), None, b"x").unwrap();
    }
    let root = champ.root();
    assert_eq!(champ.put(b"np17", Some(b"x"), b"x").unwrap(), root);
    assert_eq!(champ.remove(b"never-inserted", None).unwrap(), root);
}

#[test]
fn test_stale_writer_gets_concurrent_modification() {
    let store = MemoryStore::new();
    let mut writer_a = Champ::create(&store, config()).unwrap();
    let base = writer_a.put(b"counter", None, b"1").unwrap();
    let mut writer_b = Champ::load(&store, base, config()).unwrap();

    writer_a.put(b"counter", Some(b"1"), b"2").unwrap();
    let mut reloaded = Champ::load(&store, writer_a.root(), config()).unwrap();

    // b still believes the value is 1, and it is, at b's root
    writer_b.put(b"counter", Some(b"1"), b"5").unwrap();
    // against the live root the same write is stale
    let err = reloaded.put(b"counter", Some(b"1"), b"5").unwrap_err();
    assert!(matches!(err, Error::ConcurrentModification { .. }));
}

// ============================================================================
// Push-down and fold-back
// ============================================================================

#[test]
fn test_overflowing_bucket_is_pushed_down() {
    let store = MemoryStore::new();
    let hasher = Arc::new(push_down_hasher());
    let mut champ = champ_with(&store, &hasher);

    for key in ["k0", "k1", "k2"] {
        champ.put(key.as_bytes(), None, key.as_bytes()).unwrap();
    }
    assert_eq!(
        bucket_keys(champ.root_node(), 7),
        Some(vec!["k0".into(), "k1".into(), "k2".into()])
    );

    champ.put(b"k3", None, b"k3").unwrap();
    assert!(matches!(
        champ.root_node().payload_at(7),
        Some(Payload::Link(_))
    ));
    for key in ["k0", "k1", "k2", "k3"] {
        assert_eq!(champ.get(key.as_bytes()).unwrap(), Some(key.as_bytes().to_vec()));
    }
    assert_eq!(champ.size().unwrap(), 4);
}

#[test]
fn test_removal_folds_child_back_inline() {
    let store = MemoryStore::new();
    let hasher = Arc::new(push_down_hasher());
    let mut champ = champ_with(&store, &hasher);
    for key in ["k0", "k1", "k2", "k3"] {
        champ.put(key.as_bytes(), None, key.as_bytes()).unwrap();
    }

    champ.remove(b"k1", Some(b"k1")).unwrap();

    assert_eq!(champ.root_node().node_count(), 0);
    assert_eq!(
        bucket_keys(champ.root_node(), 7),
        Some(vec!["k0".into(), "k2".into(), "k3".into()])
    );

    let mut fresh = champ_with(&store, &hasher);
    for key in ["k3", "k2", "k0"] {
        fresh.put(key.as_bytes(), None, key.as_bytes()).unwrap();
    }
    assert_eq!(fresh.root(), champ.root());
}

#[test]
fn test_fold_back_escalates_through_several_levels() {
    // same bucket at depth 0 (7) and depth 1 (0), apart at depth 2
    let hasher = Arc::new(
        TableHasher::default()
            .with("m0", &[7, 0b0000])
            .with("m1", &[7, 0b0100])
            .with("m2", &[7, 0b1000])
            .with("m3", &[7, 0b1100]),
    );
    let store = MemoryStore::new();
    let mut champ = champ_with(&store, &hasher);
    for key in ["m0", "m1", "m2", "m3"] {
        champ.put(key.as_bytes(), None, b"v").unwrap();
    }

    // root -> link at 7 -> link at 0 -> four inline buckets
    let Some(Payload::Link(child_hash)) = champ.root_node().payload_at(7).cloned() else {
        panic!("expected a link at bucket 7");
    };
    let child = ChampNode::load(&store, &child_hash).unwrap();
    assert_eq!(child.node_count(), 1);
    assert_eq!(child.key_count(), 0);
    assert!(matches!(child.payload_at(0), Some(Payload::Link(_))));

    champ.remove(b"m2", Some(b"v")).unwrap();

    assert_eq!(champ.root_node().node_count(), 0);
    assert_eq!(
        bucket_keys(champ.root_node(), 7),
        Some(vec!["m0".into(), "m1".into(), "m3".into()])
    );
    assert_eq!(champ.size().unwrap(), 3);

    let mut fresh = champ_with(&store, &hasher);
    for key in ["m0", "m1", "m3"] {
        fresh.put(key.as_bytes(), None, b"v").unwrap();
    }
    assert_eq!(fresh.root(), champ.root());
}

#[test]
fn test_diff_between_pushed_down_and_inline_shapes() {
    let store = MemoryStore::new();
    let hasher = Arc::new(push_down_hasher());
    let mut champ = champ_with(&store, &hasher);
    for key in ["k0", "k1", "k2"] {
        champ.put(key.as_bytes(), None, b"v").unwrap();
    }
    let inline_root = champ.root();
    champ.put(b"k3", None, b"v").unwrap();
    champ.put(b"k0", Some(b"v"), b"w").unwrap();
    let linked_root = champ.root();

    let forward = diff_trees(
        &store,
        champ.hasher(),
        config(),
        Some(inline_root),
        Some(linked_root),
    )
    .unwrap();
    let keys: Vec<_> = forward.entries.iter().map(|e| e.key.clone()).collect();
    assert_eq!(keys, vec![b"k0".to_vec(), b"k3".to_vec()]);
    assert_eq!(forward.added_count(), 1);
    assert_eq!(forward.modified_count(), 1);

    let backward = diff_trees(
        &store,
        champ.hasher(),
        config(),
        Some(linked_root),
        Some(inline_root),
    )
    .unwrap();
    assert_eq!(backward.removed_count(), 1);
    assert_eq!(backward.modified_count(), 1);
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_identical_hashes_exhaust_depth() {
    let hasher = Arc::new(
        TableHasher::default()
            .with("x", &[1, 2, 3])
            .with("y", &[1, 2, 3]),
    );
    let store = MemoryStore::new();
    let mut champ = Champ::create(&store, ChampConfig::new(6, 1).unwrap())
        .unwrap()
        .with_hasher(hasher as Arc<dyn KeyHasher>);

    let root = champ.put(b"x", None, b"1").unwrap();
    let err = champ.put(b"y", None, b"2").unwrap_err();
    assert!(matches!(err, Error::HashCollisionExhausted { .. }));
    assert_eq!(champ.root(), root);
    assert_eq!(champ.get(b"y").unwrap(), None);
}

#[test]
fn test_missing_child_is_not_found() {
    let hasher = Arc::new(push_down_hasher());
    let populated = MemoryStore::new();
    let mut champ = champ_with(&populated, &hasher);
    for key in ["k0", "k1", "k2", "k3"] {
        champ.put(key.as_bytes(), None, b"v").unwrap();
    }

    // copy only the root node into a second store
    let root = champ.root();
    let partial = MemoryStore::new();
    let bytes = nanopub_index::ContentAddressedStore::get(&populated, &root).unwrap();
    nanopub_index::ContentAddressedStore::put(&partial, &bytes).unwrap();

    let reopened = Champ::load(&partial, root, config())
        .unwrap()
        .with_hasher(Arc::clone(&hasher) as Arc<dyn KeyHasher>);
    assert!(matches!(reopened.get(b"k0"), Err(Error::NotFound(_))));
    assert!(matches!(reopened.size(), Err(Error::NotFound(_))));
}
