//! Replication records stored as trie values

use serde::{Deserialize, Serialize};

/// What we last learned about a peer server's journal
///
/// Replication compares `journal_id` to detect a reset peer and resumes
/// from `next_nanopub_no`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerState {
    /// Peer base URL, also the trie key
    pub url: String,
    /// Journal identifier the peer reported
    pub journal_id: u64,
    /// First nanopub number not yet fetched from this peer
    pub next_nanopub_no: u64,
}

impl PeerState {
    pub fn new(url: impl Into<String>, journal_id: u64, next_nanopub_no: u64) -> Self {
        PeerState {
            url: url.into(),
            journal_id,
            next_nanopub_no,
        }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Well-known keys of the journal collection
pub mod journal_keys {
    pub const JOURNAL_VERSION: &str = "journal-version";
    pub const JOURNAL_ID: &str = "journal-id";
    pub const NEXT_NANOPUB_NO: &str = "next-nanopub-no";

    /// Key mapping an index number to the artifact code it was assigned to
    pub fn nanopub_no(n: u64) -> String {
        format!("nanopub-no:{}", n)
    }
}
