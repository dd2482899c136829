//! Index record for an ingested nanopub

use super::Hash;
use serde::{Deserialize, Serialize};

/// Value stored under an artifact code in the nanopub collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NanopubRecord {
    /// Digest of the document blob
    pub document: Hash,
    /// Position in the local journal, assigned once on first ingest
    pub number: u64,
}

impl NanopubRecord {
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
