//! Operations across trie versions

mod diff;

pub use diff::{diff_iter, diff_trees, ChangeKind, Diff, DiffEntry, DiffIter};
