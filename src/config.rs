//! Registry configuration
//!
//! The data directory holds two files: `nodes.unitree` (the shared node
//! store) and `meta.bin` (per-tree metadata).

use crate::model::HashAlgorithm;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the default data directory
pub const DATA_DIR_ENV: &str = "UNIDB_DIR";

const NODES_FILE: &str = "nodes.unitree";
const META_FILE: &str = "meta.bin";

#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the node and metadata files
    pub data_dir: PathBuf,
    /// Cache height limit for trees created without an explicit one
    pub default_cache_height_limit: u32,
    /// Hash function for trees created without an explicit one
    pub hash: HashAlgorithm,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
            default_cache_height_limit: 0,
            hash: HashAlgorithm::default(),
        }
    }

    /// Resolve the data directory: explicit path, then `UNIDB_DIR`, then the
    /// platform data directory
    pub fn resolve(data_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = data_dir {
            return Ok(Self::new(dir));
        }

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self::new(dir));
            }
        }

        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not find data directory".into()))?
            .join("unitree");
        Ok(Self::new(dir))
    }

    pub fn with_cache_height_limit(mut self, limit: u32) -> Self {
        self.default_cache_height_limit = limit;
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.data_dir.join(NODES_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(META_FILE)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the data directory if needed
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            Error::Config(format!(
                "Failed to create data dir {}: {}",
                self.data_dir.display(),
                e
            ))
        })
    }
}
