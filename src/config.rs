//! Trie parameters and the per-database config file

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default hash bits consumed per trie level (32-way fan-out)
pub const DEFAULT_BIT_WIDTH: u8 = 5;

/// Default number of colliding keys kept inline before pushing down
pub const DEFAULT_MAX_COLLISIONS: usize = 3;

/// Widest supported level; bucket sets are stored in a `u64`
pub const MAX_BIT_WIDTH: u8 = 6;

/// Shape parameters of a CHAMP trie
///
/// Every handle that touches the same root must use the same values,
/// otherwise lookups descend into the wrong buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChampConfig {
    #[serde(default = "default_bit_width")]
    pub bit_width: u8,
    #[serde(default = "default_max_collisions")]
    pub max_collisions: usize,
}

fn default_bit_width() -> u8 {
    DEFAULT_BIT_WIDTH
}

fn default_max_collisions() -> usize {
    DEFAULT_MAX_COLLISIONS
}

impl Default for ChampConfig {
    fn default() -> Self {
        ChampConfig {
            bit_width: DEFAULT_BIT_WIDTH,
            max_collisions: DEFAULT_MAX_COLLISIONS,
        }
    }
}

impl ChampConfig {
    pub fn new(bit_width: u8, max_collisions: usize) -> Result<Self> {
        let config = ChampConfig {
            bit_width,
            max_collisions,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bit_width == 0 || self.bit_width > MAX_BIT_WIDTH {
            return Err(Error::Config(format!(
                "bit_width must be between 1 and {}, got {}",
                MAX_BIT_WIDTH, self.bit_width
            )));
        }
        if self.max_collisions == 0 {
            return Err(Error::Config("max_collisions must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of buckets per node
    pub fn buckets(&self) -> usize {
        1 << self.bit_width
    }
}

/// Settings stored alongside the database file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub champ: ChampConfig,
    /// `tracing` filter used by the CLI when `RUST_LOG` is unset
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl IndexConfig {
    /// Load config for a database, falling back to defaults
    pub fn load(db_path: &Path) -> Result<Self> {
        let config_path = Self::config_path(db_path);
        let config: IndexConfig = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        config.champ.validate()?;
        Ok(config)
    }

    pub fn save(&self, db_path: &Path) -> Result<()> {
        self.champ.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path(db_path), content)?;
        Ok(())
    }

    /// `<db>.config.json`
    pub fn config_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".config.json");
        PathBuf::from(name)
    }
}
