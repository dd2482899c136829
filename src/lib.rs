//! # nanopub_index
//!
//! A content-addressed index for a nanopublication server.
//!
//! The index is a persistent CHAMP hash trie whose nodes are stored under
//! the digest of their canonical encoding. Every update yields a new root
//! digest while sharing untouched subtrees with earlier versions, and two
//! roots can be diffed without materializing either tree.
//!
//! ## Core Concepts
//!
//! - **Champ**: a trie handle bound to a store and a current root
//! - **ContentAddressedStore**: put/get/remove of blobs by digest
//! - **Diff**: the keys whose values differ between two roots
//! - **Database**: named collections (nanopubs, journal, peers, packaged
//!   files) in one file, each a trie with its own root pointer
//!
//! ## Example
//!
//! ```ignore
//! use nanopub_index::{Champ, ChampConfig, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let mut champ = Champ::create(&store, ChampConfig::default())?;
//! let r1 = champ.put(b"a", None, b"1")?;
//! champ.put(b"a", Some(b"1"), b"2")?;
//! let changes: Vec<_> = champ.changes_since(Some(r1)).collect();
//! ```

pub mod config;
pub mod model;
pub mod ops;
pub mod store;
pub mod trie;

mod database;
mod error;

pub use config::{ChampConfig, IndexConfig};
pub use database::{Collection, Database, JOURNAL_FORMAT_VERSION};
pub use error::{Error, Result};
pub use model::{Hash, NanopubRecord, PeerState};
pub use ops::{diff_trees, ChangeKind, Diff, DiffEntry, DiffIter};
pub use store::{ContentAddressedStore, MemoryStore, ObjectStore};
pub use trie::{Blake3KeyHasher, Champ, KeyHasher};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"NANOPUBX";
