//! Level-bounded node cache

use super::TrieNode;
use crate::model::{Hash, TREE_HEIGHT};
use std::collections::HashMap;

/// In-memory cache of decoded nodes.
///
/// Only nodes whose height above the leaf level is at least
/// `height_limit` are kept, so a limit of 0 caches everything and a limit of
/// `TREE_HEIGHT` keeps only the root.
pub struct NodeCache {
    nodes: HashMap<Hash, TrieNode>,
    /// Entries inserted since the last mark, dropped by `rollback`
    recent: Vec<Hash>,
    height_limit: u32,
}

impl NodeCache {
    pub fn new(height_limit: u32) -> Self {
        NodeCache {
            nodes: HashMap::new(),
            recent: Vec::new(),
            height_limit,
        }
    }

    pub fn height_limit(&self) -> u32 {
        self.height_limit
    }

    pub fn get(&self, hash: &Hash) -> Option<&TrieNode> {
        self.nodes.get(hash)
    }

    /// Cache a node found at `depth` if it is high enough in the tree
    pub fn insert(&mut self, hash: Hash, node: TrieNode, depth: usize) {
        if !self.admits(depth) {
            return;
        }
        if self.nodes.insert(hash, node).is_none() {
            self.recent.push(hash);
        }
    }

    pub fn admits(&self, depth: usize) -> bool {
        TREE_HEIGHT.saturating_sub(depth) >= self.height_limit as usize
    }

    /// Start a new epoch: entries cached so far survive the next rollback
    pub fn mark(&mut self) {
        self.recent.clear();
    }

    /// Forget everything cached since the last mark
    pub fn rollback(&mut self) -> usize {
        let dropped = self.recent.len();
        for hash in self.recent.drain(..) {
            self.nodes.remove(&hash);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
