//! High-level Database API
//!
//! A database is one `ObjectStore` file holding several independent tries
//! ("collections"). Each collection's current root lives in the store's
//! root-pointer table under the collection name; every write builds a new
//! root and swaps the pointer against the root it started from.

use crate::config::IndexConfig;
use crate::model::{journal_keys, Hash, NanopubRecord, PeerState};
use crate::ops::{diff_trees, Diff};
use crate::store::ObjectStore;
use crate::trie::Champ;
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version written to the journal collection of a new database
pub const JOURNAL_FORMAT_VERSION: &str = "1";

/// The tries kept in one database
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    /// artifact code → [`NanopubRecord`]
    Nanopubs,
    /// journal counters and `nanopub-no:<n>` → artifact code
    Journal,
    /// peer URL → [`PeerState`]
    Peers,
    /// file name → packaged bytes
    PackagedFiles,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Nanopubs,
        Collection::Journal,
        Collection::Peers,
        Collection::PackagedFiles,
    ];

    /// Root-pointer name
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Nanopubs => "nanopubs",
            Collection::Journal => "journal",
            Collection::Peers => "peers",
            Collection::PackagedFiles => "packaged-files",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown collection: {}", s)))
    }
}

/// The main database interface
pub struct Database {
    store: ObjectStore,
    config: IndexConfig,
}

impl Database {
    /// Create a new database at the given path
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = ObjectStore::create(path)?;
        let config = IndexConfig::load(path)?;
        let mut db = Database { store, config };
        db.init_journal()?;
        Ok(db)
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = ObjectStore::open(path)?;
        let config = IndexConfig::load(path)?;
        Ok(Database { store, config })
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn init_journal(&mut self) -> Result<()> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let digest = Hash::digest_many(&[
            self.store.path().to_string_lossy().as_bytes(),
            &seed.to_le_bytes(),
        ]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest.as_bytes()[..8]);
        let journal_id = u64::from_le_bytes(id);

        let start = self.root(Collection::Journal);
        let mut journal = self.collection(Collection::Journal)?;
        journal.put(
            journal_keys::JOURNAL_VERSION.as_bytes(),
            None,
            JOURNAL_FORMAT_VERSION.as_bytes(),
        )?;
        journal.put(
            journal_keys::JOURNAL_ID.as_bytes(),
            None,
            journal_id.to_string().as_bytes(),
        )?;
        journal.put(journal_keys::NEXT_NANOPUB_NO.as_bytes(), None, b"0")?;
        let root = journal.root();
        self.swap_root(Collection::Journal, start, root)
    }

    // === Collections ===

    /// Current root of a collection, if it was ever written
    pub fn root(&self, kind: Collection) -> Option<Hash> {
        self.store.get_root(kind.name())
    }

    /// A trie handle at the collection's current root
    pub fn collection(&self, kind: Collection) -> Result<Champ<'_, ObjectStore>> {
        match self.root(kind) {
            Some(root) => Champ::load(&self.store, root, self.config.champ),
            None => Champ::create(&self.store, self.config.champ),
        }
    }

    fn swap_root(&self, kind: Collection, started: Option<Hash>, root: Hash) -> Result<()> {
        self.swap_roots(&[(kind, started, root)])
    }

    /// Move several collection roots together; if any moved since it was
    /// read, none are swapped.
    fn swap_roots(&self, swaps: &[(Collection, Option<Hash>, Hash)]) -> Result<()> {
        let changed: Vec<_> = swaps
            .iter()
            .filter(|(_, started, root)| *started != Some(*root))
            .map(|&(kind, started, root)| (kind.name(), started, root))
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        self.store.compare_and_swap_roots(&changed)
    }

    /// Keys of a collection that changed since `old_root`
    pub fn changes_since(&self, kind: Collection, old_root: Option<Hash>) -> Result<Diff> {
        let champ = self.collection(kind)?;
        diff_trees(
            &self.store,
            champ.hasher(),
            self.config.champ,
            old_root,
            Some(champ.root()),
        )
    }

    // === Nanopubs ===

    /// Store a nanopub and give it the next journal number. Re-adding a
    /// known artifact code returns its existing number.
    ///
    /// The journal and nanopubs roots move in one swap, so a concurrent
    /// writer leaves both untouched and the number unassigned.
    #[tracing::instrument(skip(self, document), fields(bytes = document.len()))]
    pub fn add_nanopub(&mut self, artifact_code: &str, document: &[u8]) -> Result<u64> {
        let nanopubs_start = self.root(Collection::Nanopubs);
        let journal_start = self.root(Collection::Journal);

        let mut nanopubs = self.collection(Collection::Nanopubs)?;
        if let Some(existing) = nanopubs.get(artifact_code.as_bytes())? {
            let record = NanopubRecord::from_bytes(&existing)?;
            tracing::debug!(number = record.number, "nanopub already indexed");
            return Ok(record.number);
        }

        let mut journal = self.collection(Collection::Journal)?;
        let counter = journal.get(journal_keys::NEXT_NANOPUB_NO.as_bytes())?;
        let number = parse_counter(counter.as_deref())?;

        let record = NanopubRecord {
            document: self.store.put_document(document)?,
            number,
        };
        nanopubs.put(artifact_code.as_bytes(), None, &record.to_bytes()?)?;
        journal.put(
            journal_keys::nanopub_no(number).as_bytes(),
            None,
            artifact_code.as_bytes(),
        )?;
        journal.put(
            journal_keys::NEXT_NANOPUB_NO.as_bytes(),
            counter.as_deref(),
            (number + 1).to_string().as_bytes(),
        )?;

        self.swap_roots(&[
            (Collection::Journal, journal_start, journal.root()),
            (Collection::Nanopubs, nanopubs_start, nanopubs.root()),
        ])?;
        tracing::debug!(number, "indexed nanopub");
        Ok(number)
    }

    pub fn nanopub_record(&self, artifact_code: &str) -> Result<Option<NanopubRecord>> {
        self.collection(Collection::Nanopubs)?
            .get(artifact_code.as_bytes())?
            .map(|bytes| NanopubRecord::from_bytes(&bytes))
            .transpose()
    }

    /// Document bytes of a nanopub
    pub fn get_nanopub(&self, artifact_code: &str) -> Result<Option<Vec<u8>>> {
        match self.nanopub_record(artifact_code)? {
            Some(record) => Ok(Some(self.store.get_document(&record.document)?)),
            None => Ok(None),
        }
    }

    /// Artifact code assigned journal number `number`
    pub fn nanopub_by_number(&self, number: u64) -> Result<Option<String>> {
        let journal = self.collection(Collection::Journal)?;
        journal
            .get(journal_keys::nanopub_no(number).as_bytes())?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| Error::Corruption(format!("artifact code: {}", e)))
            })
            .transpose()
    }

    pub fn nanopub_count(&self) -> Result<u64> {
        self.collection(Collection::Nanopubs)?.size()
    }

    pub fn next_nanopub_no(&self) -> Result<u64> {
        let journal = self.collection(Collection::Journal)?;
        let counter = journal.get(journal_keys::NEXT_NANOPUB_NO.as_bytes())?;
        parse_counter(counter.as_deref())
    }

    pub fn journal_id(&self) -> Result<Option<u64>> {
        let journal = self.collection(Collection::Journal)?;
        match journal.get(journal_keys::JOURNAL_ID.as_bytes())? {
            Some(bytes) => parse_counter(Some(&bytes)).map(Some),
            None => Ok(None),
        }
    }

    // === Peers ===

    /// Record replication state for a peer, replacing any previous state
    pub fn set_peer(&mut self, peer: &PeerState) -> Result<()> {
        let start = self.root(Collection::Peers);
        let mut peers = self.collection(Collection::Peers)?;
        let current = peers.get(peer.url.as_bytes())?;
        peers.put(peer.url.as_bytes(), current.as_deref(), &peer.to_bytes()?)?;
        let root = peers.root();
        self.swap_root(Collection::Peers, start, root)
    }

    pub fn get_peer(&self, url: &str) -> Result<Option<PeerState>> {
        self.collection(Collection::Peers)?
            .get(url.as_bytes())?
            .map(|bytes| PeerState::from_bytes(&bytes))
            .transpose()
    }

    /// All known peers, sorted by URL
    pub fn peers(&self) -> Result<Vec<PeerState>> {
        let mut peers = self
            .collection(Collection::Peers)?
            .entries()?
            .into_iter()
            .map(|(_, v)| PeerState::from_bytes(&v))
            .collect::<Result<Vec<_>>>()?;
        peers.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(peers)
    }

    pub fn remove_peer(&mut self, url: &str) -> Result<bool> {
        let start = self.root(Collection::Peers);
        let mut peers = self.collection(Collection::Peers)?;
        let Some(current) = peers.get(url.as_bytes())? else {
            return Ok(false);
        };
        peers.remove(url.as_bytes(), Some(&current))?;
        let root = peers.root();
        self.swap_root(Collection::Peers, start, root)?;
        Ok(true)
    }

    // === Packaged files ===

    pub fn put_packaged(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let start = self.root(Collection::PackagedFiles);
        let mut files = self.collection(Collection::PackagedFiles)?;
        let current = files.get(name.as_bytes())?;
        files.put(name.as_bytes(), current.as_deref(), bytes)?;
        let root = files.root();
        self.swap_root(Collection::PackagedFiles, start, root)
    }

    pub fn get_packaged(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.collection(Collection::PackagedFiles)?.get(name.as_bytes())
    }

    /// Flush the store to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}

fn parse_counter(bytes: Option<&[u8]>) -> Result<u64> {
    let Some(bytes) = bytes else {
        return Ok(0);
    };
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corruption(format!("bad journal counter: {:?}", bytes)))
}
