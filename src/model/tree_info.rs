//! TreeInfo - the persisted description of a named tree

use super::{Hash, HashAlgorithm};
use serde::{Deserialize, Serialize};

/// Metadata about one named tree.
///
/// This is everything needed to rebuild the engine on restart: node bodies
/// live in the shared node store keyed by hash, not by tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeInfo {
    /// Unique tree name
    pub name: String,

    /// Last known root (may point at nodes that were never committed)
    pub root: Hash,

    /// Root as of the last successful commit
    #[serde(default)]
    pub committed_root: Hash,

    /// Number of levels (bit width of the hash output)
    pub height: u32,

    /// Node loads served by the node store
    pub load_db_counter: u64,

    /// Node loads served by the in-memory cache
    pub load_cache_counter: u64,

    /// Nodes within this many levels of the leaves are not cached
    pub cache_height_limit: u32,

    /// Hash function the tree was created with
    #[serde(default)]
    pub hash: HashAlgorithm,
}

impl TreeInfo {
    /// Describe a new, empty tree
    pub fn new(name: impl Into<String>, cache_height_limit: u32, hash: HashAlgorithm) -> Self {
        TreeInfo {
            name: name.into(),
            root: Hash::ZERO,
            committed_root: Hash::ZERO,
            height: super::TREE_HEIGHT as u32,
            load_db_counter: 0,
            load_cache_counter: 0,
            cache_height_limit,
            hash,
        }
    }

    /// Serialize for the metadata store
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a record written by [`TreeInfo::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Two infos describe the same tree state if name and root agree
    pub fn same_state(&self, other: &TreeInfo) -> bool {
        self.name == other.name && self.root == other.root
    }
}
