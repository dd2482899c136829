//! Single-file object store with content-addressed storage
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("NANOPUBX")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - roots_offset: 8 bytes (u64 LE)
//!   - roots_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [OBJECTS: variable]
//!   - blob data, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (hash, offset, size) entries
//!
//! [ROOTS: variable]
//!   - collection names → root node hashes
//! ```

use super::ContentAddressedStore;
use crate::model::Hash;
use crate::store::blob::{Blob, BlobType};
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_SIZE: u64 = 64;

/// 32 (hash) + 8 (offset) + 4 (size)
const INDEX_ENTRY_SIZE: usize = 44;

#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// A content-addressed object store backed by a single file
///
/// Besides blobs, the file carries a small table of named root pointers:
/// the only mutable state of a trie collection.
pub struct ObjectStore {
    path: std::path::PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Hash, IndexEntry>>,
    roots: RwLock<BTreeMap<String, Hash>>,
    /// Current append position
    write_offset: RwLock<u64>,
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

impl ObjectStore {
    /// Create a new database file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "created object store");

        Ok(ObjectStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            roots: RwLock::new(BTreeMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
        })
    }

    /// Open an existing database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header, 8);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let object_count = read_u64(&header, 16);
        let index_offset = read_u64(&header, 24);
        let roots_offset = read_u64(&header, 32);
        let roots_count = read_u64(&header, 40);

        let mut index = HashMap::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut entry_buf)?;

                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&entry_buf[0..32]);
                let offset = read_u64(&entry_buf, 32);
                let size = read_u32(&entry_buf, 40);

                index.insert(Hash::from_bytes(hash_bytes), IndexEntry { offset, size });
            }
        }

        let mut roots = BTreeMap::new();
        if roots_offset > 0 && roots_count > 0 {
            file.seek(SeekFrom::Start(roots_offset))?;
            for _ in 0..roots_count {
                let mut len_buf = [0u8; 2];
                file.read_exact(&mut len_buf)?;
                let name_len = u16::from_le_bytes(len_buf) as usize;

                let mut name_buf = vec![0u8; name_len];
                file.read_exact(&mut name_buf)?;
                let name = String::from_utf8(name_buf)
                    .map_err(|_| Error::Corruption("Root name is not UTF-8".into()))?;

                let mut hash_buf = [0u8; 32];
                file.read_exact(&mut hash_buf)?;

                roots.insert(name, Hash::from_bytes(hash_buf));
            }
        }

        // New objects overwrite the old index; sync() rewrites it afterwards
        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };

        tracing::debug!(
            path = %path.display(),
            objects = index.len(),
            roots = roots.len(),
            "opened object store"
        );

        Ok(ObjectStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            roots: RwLock::new(roots),
            write_offset: RwLock::new(write_offset),
        })
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Store a blob, returns its hash
    pub fn put_blob(&self, blob: &Blob) -> Result<Hash> {
        let hash = blob.hash();

        if self.index.read().contains_key(&hash) {
            return Ok(hash);
        }

        let compressed = blob.compress()?;
        let size = compressed.len() as u32;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;

            *write_offset = offset + size as u64;
            offset
        };

        self.index.write().insert(hash, IndexEntry { offset, size });
        tracing::trace!(%hash, blob_type = ?blob.blob_type, size, "stored blob");

        Ok(hash)
    }

    /// Retrieve a blob by hash
    pub fn get_blob(&self, hash: &Hash) -> Result<Blob> {
        let entry = self
            .index
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut data = vec![0u8; entry.size as usize];
        file.read_exact(&mut data)?;

        Blob::decompress(&data)
    }

    /// Check if a hash exists
    pub fn contains_blob(&self, hash: &Hash) -> bool {
        self.index.read().contains_key(hash)
    }

    /// Store a nanopub document and return its hash
    pub fn put_document(&self, data: &[u8]) -> Result<Hash> {
        self.put_blob(&Blob::new(BlobType::Document, data.to_vec()))
    }

    /// Retrieve a nanopub document by hash
    pub fn get_document(&self, hash: &Hash) -> Result<Vec<u8>> {
        let blob = self.get_blob(hash)?;
        if blob.blob_type != BlobType::Document {
            return Err(Error::Corruption(format!(
                "Expected Document, got {:?}",
                blob.blob_type
            )));
        }
        Ok(blob.data)
    }

    // === Root pointers ===

    pub fn get_root(&self, name: &str) -> Option<Hash> {
        self.roots.read().get(name).copied()
    }

    /// Unconditionally point `name` at `root`
    pub fn set_root(&self, name: &str, root: Hash) {
        self.roots.write().insert(name.to_string(), root);
    }

    /// Swap the root pointer only if it still holds `expected`
    /// (`None` meaning no pointer recorded yet).
    pub fn compare_and_swap_root(
        &self,
        name: &str,
        expected: Option<Hash>,
        new: Hash,
    ) -> Result<()> {
        self.compare_and_swap_roots(&[(name, expected, new)])
    }

    /// Swap several root pointers at once. Every `(name, expected, new)`
    /// is checked before any pointer moves, so either all swap or none do.
    pub fn compare_and_swap_roots(&self, swaps: &[(&str, Option<Hash>, Hash)]) -> Result<()> {
        let mut roots = self.roots.write();
        for &(name, expected, _) in swaps {
            let current = roots.get(name).copied();
            if current != expected {
                return Err(Error::ConcurrentModification {
                    key: format!("root:{}", name),
                    expected: expected.map_or_else(|| "<absent>".into(), |h| h.to_hex()),
                    found: current.map_or_else(|| "<absent>".into(), |h| h.to_hex()),
                });
            }
        }
        for &(name, _, new) in swaps {
            roots.insert(name.to_string(), new);
            tracing::debug!(root = name, %new, "swapped root pointer");
        }
        Ok(())
    }

    pub fn list_roots(&self) -> Vec<(String, Hash)> {
        self.roots
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn object_count(&self) -> usize {
        self.index.read().len()
    }

    /// Flush changes and write index and root table to disk
    pub fn sync(&self) -> Result<()> {
        let index = self.index.read();
        let roots = self.roots.read();
        let write_offset = *self.write_offset.read();
        let mut file = self.file.write();

        let index_size = index.len() * INDEX_ENTRY_SIZE;
        let roots_offset = write_offset + index_size as u64;

        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;
        file.write_all(&roots_offset.to_le_bytes())?;
        file.write_all(&(roots.len() as u64).to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;

        // Sort by hash for determinism
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by_key(|(h, _)| h.as_bytes());

        for (hash, entry) in entries {
            file.write_all(hash.as_bytes())?;
            file.write_all(&entry.offset.to_le_bytes())?;
            file.write_all(&entry.size.to_le_bytes())?;
        }

        // Format: for each root: name_len (u16) + name + hash (32 bytes)
        for (name, hash) in roots.iter() {
            let name_bytes = name.as_bytes();
            file.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
            file.write_all(name_bytes)?;
            file.write_all(hash.as_bytes())?;
        }

        let end = file.stream_position()?;
        file.set_len(end)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentAddressedStore for ObjectStore {
    fn put(&self, data: &[u8]) -> Result<Hash> {
        self.put_blob(&Blob::new(BlobType::Node, data.to_vec()))
            .map_err(Error::into_storage)
    }

    fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        let blob = self.get_blob(hash).map_err(|e| match e {
            Error::Corruption(msg) => Error::MalformedNode(format!("{}: {}", hash.short(), msg)),
            other => other.into_storage(),
        })?;
        if blob.blob_type != BlobType::Node {
            return Err(Error::MalformedNode(format!(
                "{} is a {:?} blob",
                hash.short(),
                blob.blob_type
            )));
        }
        Ok(blob.data)
    }

    /// Drops the index entry; the bytes stay in the file
    fn remove(&self, hash: &Hash) -> Result<()> {
        self.index.write().remove(hash);
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.contains_blob(hash))
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!(path = %self.path.display(), error = %e, "sync on drop failed");
        }
    }
}
