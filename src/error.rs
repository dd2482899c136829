//! Error types for nanopub_index

use thiserror::Error;

/// Result type alias for nanopub_index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nanopub_index operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored bytes do not decode into a well-formed trie node
    #[error("Malformed node: {0}")]
    MalformedNode(String),

    /// Digest is unknown to the store
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Transient failure of the backing store
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The caller-observed value no longer matches the stored one
    #[error("Concurrent modification of {key}: expected {expected}, found {found}")]
    ConcurrentModification {
        key: String,
        expected: String,
        found: String,
    },

    /// Key hashes agree on every bit the trie can consume
    #[error("Hash collision exhausted the key hash at depth {depth}")]
    HashCollisionExhausted { depth: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `ConcurrentModification` from raw observed/stored values.
    pub(crate) fn concurrent(key: &[u8], expected: Option<&[u8]>, found: Option<&[u8]>) -> Self {
        Error::ConcurrentModification {
            key: display_bytes(key),
            expected: expected.map_or_else(|| "<absent>".to_string(), display_bytes),
            found: found.map_or_else(|| "<absent>".to_string(), display_bytes),
        }
    }

    /// Re-tag I/O failures coming out of a store as `StorageUnavailable`.
    pub(crate) fn into_storage(self) -> Self {
        match self {
            Error::Io(e) => Error::StorageUnavailable(e.to_string()),
            other => other,
        }
    }
}

fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => format!("{:?}", s),
        Err(_) => hex::encode(bytes),
    }
}
