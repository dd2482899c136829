use super::*;
use crate::config::ChampConfig;
use crate::model::Hash;
use crate::ops::diff_trees;
use crate::store::MemoryStore;

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // small alphabet so removes and overwrites hit existing keys
    prop::collection::vec(0u8..8, 1..=3)
}

fn ops_strategy(max: usize) -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        3 => (key.clone(), prop::collection::vec(any::<u8>(), 0..4))
            .prop_map(|(k, v)| Op::Put(k, v)),
        2 => key.prop_map(Op::Remove),
    ];
    prop::collection::vec(op, 0..=max)
}

/// Every supported width; low thresholds keep the push-down and
/// fold-back paths busy.
fn config_strategy() -> impl Strategy<Value = ChampConfig> {
    (1u8..=6, 1usize..=4).prop_map(|(bw, mc)| ChampConfig {
        bit_width: bw,
        max_collisions: mc,
    })
}

fn apply(champ: &mut Champ<'_, MemoryStore>, model: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Put(k, v) => {
                let expected = model.get(k).cloned();
                champ.put(k, expected.as_deref(), v).unwrap();
                model.insert(k.clone(), v.clone());
            }
            Op::Remove(k) => {
                let expected = model.get(k).cloned();
                champ.remove(k, expected.as_deref()).unwrap();
                model.remove(k);
            }
        }
    }
}

fn net_changes(
    before: &BTreeMap<Vec<u8>, Vec<u8>>,
    after: &BTreeMap<Vec<u8>, Vec<u8>>,
) -> Vec<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)> {
    let keys: BTreeSet<_> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter_map(|k| {
            let old = before.get(k).cloned();
            let new = after.get(k).cloned();
            (old != new).then(|| (k.clone(), old, new))
        })
        .collect()
}

fn node_strategy() -> impl Strategy<Value = ChampNode> {
    let bucket = prop::collection::btree_map(
        prop::collection::vec(any::<u8>(), 0..6),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..6)),
        1..4,
    );
    prop::collection::btree_map(0usize..64, prop::option::of(bucket), 0..12).prop_map(
        |slots| {
            let mut data_map = Bitmap::EMPTY;
            let mut node_map = Bitmap::EMPTY;
            let mut buckets = Vec::new();
            let mut links = Vec::new();
            for (bit, slot) in slots {
                match slot {
                    Some(entries) => {
                        data_map.set(bit);
                        buckets.push(Payload::Bucket(
                            entries
                                .into_iter()
                                .map(|(key, value)| Mapping { key, value })
                                .collect(),
                        ));
                    }
                    None => {
                        node_map.set(bit);
                        links.push(Payload::Link(Hash::digest(&[bit as u8])));
                    }
                }
            }
            links.reverse();
            buckets.extend(links);
            ChampNode::from_parts(data_map, node_map, buckets).unwrap()
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_codec_roundtrip(node in node_strategy()) {
        let bytes = encode(&node).unwrap();
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &node);
        prop_assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn prop_put_get_matches_model(config in config_strategy(), ops in ops_strategy(200)) {
        let store = MemoryStore::new();
        let mut champ = Champ::create(&store, config).unwrap();
        let mut model = BTreeMap::new();
        apply(&mut champ, &mut model, &ops);

        for op in &ops {
            let key = match op {
                Op::Put(k, _) | Op::Remove(k) => k,
            };
            prop_assert_eq!(champ.get(key).unwrap(), model.get(key).cloned());
        }
        prop_assert_eq!(champ.size().unwrap(), model.len() as u64);

        let mut entries = champ.entries().unwrap();
        entries.sort();
        let expected: Vec<_> = model.into_iter().collect();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn prop_root_depends_only_on_contents(config in config_strategy(), ops in ops_strategy(200)) {
        let store = MemoryStore::new();
        let mut champ = Champ::create(&store, config).unwrap();
        let mut model = BTreeMap::new();
        apply(&mut champ, &mut model, &ops);

        let mut fresh = Champ::create(&store, config).unwrap();
        for (k, v) in model.iter().rev() {
            fresh.put(k, None, v).unwrap();
        }
        prop_assert_eq!(fresh.root(), champ.root());
    }

    #[test]
    fn prop_diff_matches_net_effect(
        config in config_strategy(),
        first in ops_strategy(100),
        second in ops_strategy(100),
    ) {
        let store = MemoryStore::new();
        let mut champ = Champ::create(&store, config).unwrap();
        let mut model = BTreeMap::new();
        apply(&mut champ, &mut model, &first);
        let r0 = champ.root();
        let before = model.clone();
        apply(&mut champ, &mut model, &second);

        let diff = diff_trees(&store, champ.hasher(), config, Some(r0), Some(champ.root())).unwrap();
        let got: Vec<_> = diff
            .entries
            .into_iter()
            .map(|e| (e.key, e.old, e.new))
            .collect();
        prop_assert_eq!(got, net_changes(&before, &model));
    }

    #[test]
    fn prop_diff_is_symmetric(
        config in config_strategy(),
        first in ops_strategy(100),
        second in ops_strategy(100),
    ) {
        let store = MemoryStore::new();
        let mut champ = Champ::create(&store, config).unwrap();
        let mut model = BTreeMap::new();
        apply(&mut champ, &mut model, &first);
        let a = champ.root();
        apply(&mut champ, &mut model, &second);
        let b = champ.root();

        let hasher: Arc<dyn KeyHasher> = Arc::new(Blake3KeyHasher);
        let forward = diff_trees(&store, Arc::clone(&hasher), config, Some(a), Some(b)).unwrap();
        let backward = diff_trees(&store, hasher, config, Some(b), Some(a)).unwrap();
        let reversed: Vec<_> = backward.entries.into_iter().map(|e| e.reversed()).collect();
        prop_assert_eq!(forward.entries, reversed);
    }
}
