//! Sparse merkle trie over 256-bit key paths
//!
//! - Every key maps to a fixed path of 256 bits, most significant bit first;
//!   a set bit means "go right"
//! - Empty subtrees hash to zero at every level and are never stored
//! - A subtree holding a single key is collapsed into one leaf at its top
//! - Nodes are content-addressed, so unchanged subtrees are shared between
//!   roots and between trees

mod cache;
mod node;
mod proof;
mod tree;

pub use cache::NodeCache;
pub use node::{internal_hash, leaf_hash, TrieNode};
pub use proof::{CompressedMerkleProof, MerkleProof, BITMAP_LEN};
pub use tree::{trie_key, SparseMerkleTrie, MAX_STASHED_ROOTS};
