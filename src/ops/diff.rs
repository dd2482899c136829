//! Diff operations between trie versions
//!
//! Walks two roots in lock-step, bucket by bucket, descending only where the
//! two sides differ by digest. Subtrees shared by both versions are never
//! fetched, so the cost follows the size of the change, not of the trie.

use crate::config::ChampConfig;
use crate::model::Hash;
use crate::store::ContentAddressedStore;
use crate::trie::{extract_bits, ChampNode, KeyHasher, Mapping, Payload};
use crate::Result;
use std::sync::Arc;

/// Type of change in a diff
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One key whose value differs between two versions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
}

impl DiffEntry {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }

    /// The same change seen from the other direction
    pub fn reversed(self) -> Self {
        DiffEntry {
            key: self.key,
            old: self.new,
            new: self.old,
        }
    }
}

/// A diff between two trie versions, sorted by key
#[derive(Clone, Debug, Default)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn new(mut entries: Vec<DiffEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Diff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn count(&self, kind: ChangeKind) -> usize {
        self.entries.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn added_count(&self) -> usize {
        self.count(ChangeKind::Added)
    }

    pub fn removed_count(&self) -> usize {
        self.count(ChangeKind::Removed)
    }

    pub fn modified_count(&self) -> usize {
        self.count(ChangeKind::Modified)
    }
}

/// A pair of subtrees still to compare. A side with no digest is given by
/// the inline mappings its parent held at this prefix (possibly none).
struct Frame {
    left: Option<Hash>,
    right: Option<Hash>,
    depth: usize,
    higher_left: Vec<Mapping>,
    higher_right: Vec<Mapping>,
}

enum Work {
    Compare(Frame),
    Emit(DiffEntry),
}

/// What one side holds at a bucket
enum Side {
    Link(Hash),
    Inline(Vec<Mapping>),
}

/// Lazy stream of [`DiffEntry`], ordered by bucket path
///
/// Stops after the first error.
pub struct DiffIter<'a, S: ContentAddressedStore + ?Sized> {
    store: &'a S,
    hasher: Arc<dyn KeyHasher>,
    config: ChampConfig,
    stack: Vec<Work>,
}

/// Start a diff from `old` to `new`; `None` stands for the empty trie.
pub fn diff_iter<'a, S: ContentAddressedStore + ?Sized>(
    store: &'a S,
    hasher: Arc<dyn KeyHasher>,
    config: ChampConfig,
    old: Option<Hash>,
    new: Option<Hash>,
) -> DiffIter<'a, S> {
    let mut stack = Vec::new();
    if old != new {
        stack.push(Work::Compare(Frame {
            left: old,
            right: new,
            depth: 0,
            higher_left: Vec::new(),
            higher_right: Vec::new(),
        }));
    }
    DiffIter {
        store,
        hasher,
        config,
        stack,
    }
}

/// Compute the full diff between two roots
pub fn diff_trees<S: ContentAddressedStore + ?Sized>(
    store: &S,
    hasher: Arc<dyn KeyHasher>,
    config: ChampConfig,
    old: Option<Hash>,
    new: Option<Hash>,
) -> Result<Diff> {
    let entries = diff_iter(store, hasher, config, old, new).collect::<Result<Vec<_>>>()?;
    Ok(Diff::new(entries))
}

impl<S: ContentAddressedStore + ?Sized> DiffIter<'_, S> {
    fn load(&self, hash: Option<Hash>) -> Result<ChampNode> {
        match hash {
            Some(hash) => ChampNode::load(self.store, &hash),
            None => Ok(ChampNode::empty()),
        }
    }

    /// Spread inline mappings handed down from a parent over this level's buckets
    fn regroup(&self, mappings: Vec<Mapping>, depth: usize) -> Vec<Vec<Mapping>> {
        let mut groups = vec![Vec::new(); self.config.buckets()];
        for m in mappings {
            let bit = extract_bits(&self.hasher.hash_key(&m.key), depth, self.config.bit_width);
            groups[bit].push(m);
        }
        groups
    }

    fn expand(&mut self, frame: Frame) -> Result<()> {
        if frame.left == frame.right
            && frame.higher_left.is_empty()
            && frame.higher_right.is_empty()
        {
            return Ok(());
        }

        let left = self.load(frame.left)?;
        let right = self.load(frame.right)?;
        let mut left_higher = self.regroup(frame.higher_left, frame.depth);
        let mut right_higher = self.regroup(frame.higher_right, frame.depth);

        let mut work = Vec::new();
        for bit in 0..self.config.buckets() {
            let l = side(&left, &mut left_higher[bit], bit);
            let r = side(&right, &mut right_higher[bit], bit);
            let depth = frame.depth + 1;

            match (l, r) {
                (Side::Link(a), Side::Link(b)) => {
                    if a != b {
                        work.push(Work::Compare(Frame {
                            left: Some(a),
                            right: Some(b),
                            depth,
                            higher_left: Vec::new(),
                            higher_right: Vec::new(),
                        }));
                    }
                }
                (Side::Link(a), Side::Inline(b)) => work.push(Work::Compare(Frame {
                    left: Some(a),
                    right: None,
                    depth,
                    higher_left: Vec::new(),
                    higher_right: b,
                })),
                (Side::Inline(a), Side::Link(b)) => work.push(Work::Compare(Frame {
                    left: None,
                    right: Some(b),
                    depth,
                    higher_left: a,
                    higher_right: Vec::new(),
                })),
                (Side::Inline(a), Side::Inline(b)) => {
                    work.extend(compare_buckets(a, b).into_iter().map(Work::Emit));
                }
            }
        }

        self.stack.extend(work.into_iter().rev());
        Ok(())
    }
}

fn side(node: &ChampNode, higher: &mut Vec<Mapping>, bit: usize) -> Side {
    match node.payload_at(bit) {
        Some(Payload::Link(hash)) => Side::Link(*hash),
        Some(Payload::Bucket(mappings)) => Side::Inline(mappings.clone()),
        None => Side::Inline(std::mem::take(higher)),
    }
}

/// Merge-join two key-sorted buckets, keeping keys whose values differ
fn compare_buckets(old: Vec<Mapping>, new: Vec<Mapping>) -> Vec<DiffEntry> {
    use std::cmp::Ordering;

    let mut out = Vec::new();
    let mut old = old.into_iter().peekable();
    let mut new = new.into_iter().peekable();

    loop {
        let order = match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.key.cmp(&b.key),
        };
        let (key, before, after) = match order {
            Ordering::Less => match old.next() {
                Some(m) => (m.key, m.value, None),
                None => break,
            },
            Ordering::Greater => match new.next() {
                Some(m) => (m.key, None, m.value),
                None => break,
            },
            Ordering::Equal => match (old.next(), new.next()) {
                (Some(a), Some(b)) => (a.key, a.value, b.value),
                _ => break,
            },
        };
        if before != after {
            out.push(DiffEntry {
                key,
                old: before,
                new: after,
            });
        }
    }
    out
}

impl<S: ContentAddressedStore + ?Sized> Iterator for DiffIter<'_, S> {
    type Item = Result<DiffEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(work) = self.stack.pop() {
            match work {
                Work::Emit(entry) => return Some(Ok(entry)),
                Work::Compare(frame) => {
                    if let Err(e) = self.expand(frame) {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}
