//! Blob type - the unit of content-addressed storage

use crate::model::Hash;
use serde::{Deserialize, Serialize};

/// Type tag for blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobType {
    /// A canonically encoded trie node
    Node,
    /// A nanopub document as ingested
    Document,
}

impl BlobType {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobType::Node => 0,
            BlobType::Document => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobType::Node),
            1 => Some(BlobType::Document),
            _ => None,
        }
    }
}

/// Key-derivation context for document digests
const DOCUMENT_CONTEXT: &str = "nanopub-index 2024 document blob";

/// A blob is a typed, compressed chunk of data
#[derive(Clone, Debug)]
pub struct Blob {
    /// Type of content
    pub blob_type: BlobType,
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(blob_type: BlobType, data: Vec<u8>) -> Self {
        Blob { blob_type, data }
    }

    /// Compute the content hash
    ///
    /// A node is addressed by the plain BLAKE3 of its canonical encoding,
    /// the same digest any other store gives it. Documents are hashed in
    /// BLAKE3's key-derivation mode so they never share a digest with a node.
    pub fn hash(&self) -> Hash {
        match self.blob_type {
            BlobType::Node => Hash::digest(&self.data),
            BlobType::Document => {
                let mut hasher = blake3::Hasher::new_derive_key(DOCUMENT_CONTEXT);
                hasher.update(&self.data);
                Hash::from_bytes(*hasher.finalize().as_bytes())
            }
        }
    }

    /// Compress the blob for storage
    pub fn compress(&self) -> crate::Result<Vec<u8>> {
        let mut output = Vec::new();
        output.push(self.blob_type.as_byte());
        let compressed = zstd::encode_all(self.data.as_slice(), 3)?;
        output.extend(compressed);
        Ok(output)
    }

    /// Decompress a blob from storage
    pub fn decompress(data: &[u8]) -> crate::Result<Self> {
        let (&tag, body) = data
            .split_first()
            .ok_or_else(|| crate::Error::Corruption("Empty blob data".into()))?;

        let blob_type = BlobType::from_byte(tag)
            .ok_or_else(|| crate::Error::Corruption(format!("Invalid blob type: {}", tag)))?;

        let decompressed = zstd::decode_all(body)
            .map_err(|e| crate::Error::Corruption(format!("Blob body: {}", e)))?;

        Ok(Blob {
            blob_type,
            data: decompressed,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
