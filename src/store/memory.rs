//! In-memory stores, for tests and for embedding without a data directory

use super::{MetaStore, NodeStore};
use crate::model::Hash;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// A node store kept entirely in memory
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<Hash, Vec<u8>>>,
    closed: RwLock<bool>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.read().contains_key(hash)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn put_batch(&self, entries: Vec<(Hash, Vec<u8>)>) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Storage("node store is closed".into()));
        }
        self.nodes.write().extend(entries);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.closed.write() = true;
        Ok(())
    }
}

/// A metadata store kept entirely in memory
#[derive(Default)]
pub struct MemoryMetaStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl MetaStore for MemoryMetaStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
