//! File-backed metadata store
//!
//! The whole key/value map is small (one record per tree plus the tree
//! list), so it is held in memory and every write rewrites the file through
//! a temporary file and an atomic rename.

use super::MetaStore;
use crate::{Error, Result, VERSION};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const META_MAGIC: &[u8; 8] = b"UNIMETA\0";

/// A metadata store persisted to a single file
pub struct FileMetaStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl FileMetaStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let data = fs::read(&path)?;
            decode(&data)?
        } else {
            BTreeMap::new()
        };

        Ok(FileMetaStore {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the map, persist it, then publish it
    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, Vec<u8>>)) -> Result<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        change(&mut next);

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encode(&next)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        *entries = next;
        Ok(())
    }
}

impl MetaStore for FileMetaStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        if !self.entries.read().contains_key(key) {
            return Ok(());
        }
        self.update(|map| {
            map.remove(key);
        })
    }
}

fn encode(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(META_MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend(bincode::serialize(entries)?);
    Ok(out)
}

fn decode(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    if data.len() < 12 || &data[0..8] != META_MAGIC {
        return Err(Error::InvalidFile("Invalid metadata file".into()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&data[8..12]);
    let version = u32::from_le_bytes(version);
    if version != VERSION {
        return Err(Error::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }
    Ok(bincode::deserialize(&data[12..])?)
}
