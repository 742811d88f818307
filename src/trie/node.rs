//! Trie node types and the hash composition rule

use crate::model::{Hash, HashFn};
use serde::{Deserialize, Serialize};

/// A stored node of the sparse merkle trie.
///
/// Empty subtrees are not nodes: they are represented by [`Hash::ZERO`] at
/// every level and never written to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// Two children; either may be the zero hash, never both
    Internal { left: Hash, right: Hash },
    /// A key/value pair sitting at the top of a subtree that holds only it
    Leaf { key: Hash, value: Vec<u8> },
}

impl TrieNode {
    /// Body written to the node store
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Compute this node's hash given the depth it sits at
    pub fn hash(&self, hasher: HashFn, depth: usize) -> Hash {
        match self {
            TrieNode::Internal { left, right } => internal_hash(hasher, left, right),
            TrieNode::Leaf { key, value } => leaf_hash(hasher, key, value, depth),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TrieNode::Leaf { .. })
    }
}

/// Domain tag prefixed to every leaf hash input
pub const LEAF_TAG: u8 = 0x00;

/// Domain tag prefixed to every internal hash input
pub const INTERNAL_TAG: u8 = 0x01;

/// `H(0x00 || key || value || depth)`, depth as big-endian u16.
///
/// Binding the depth means a leaf moved to another level is a different node.
/// The tag keeps a leaf from ever hashing like an internal node.
pub fn leaf_hash(hasher: HashFn, key: &Hash, value: &[u8], depth: usize) -> Hash {
    let depth = (depth as u16).to_be_bytes();
    hasher(&[&[LEAF_TAG], key.as_bytes(), value, &depth])
}

/// `H(0x01 || left || right)`; two empty children make an empty parent.
pub fn internal_hash(hasher: HashFn, left: &Hash, right: &Hash) -> Hash {
    if left.is_zero() && right.is_zero() {
        return Hash::ZERO;
    }
    hasher(&[&[INTERNAL_TAG], left.as_bytes(), right.as_bytes()])
}
