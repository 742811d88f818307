//! # unitree_db
//!
//! Named, authenticated key/value trees over one shared content-addressed
//! node store.
//!
//! Each tree is a sparse merkle trie: every key has a fixed 256-bit path,
//! and the root hash commits to the whole key/value set. Trees support
//! batched updates, cheap versioning (stash, commit, revert) and inclusion
//! or non-inclusion proofs, plain or bitmap-compressed.
//!
//! ## Core Concepts
//!
//! - **Registry**: the set of named trees and their persisted metadata
//! - **Trie**: one tree; updates are staged in memory until committed
//! - **Proofs**: sibling hashes from a leaf position up to the root, checked
//!   by the stateless functions in [`verify`]
//!
//! ## Example
//!
//! ```ignore
//! use unitree_db::Registry;
//!
//! let registry = Registry::in_memory();
//! registry.create_tree("accounts", 0)?;
//! let root = registry.update("accounts", &[("alice", "10"), ("bob", "3")])?;
//! let proof = registry.merkle_proof("accounts", b"alice")?;
//! assert!(registry.verify_inclusion("accounts", &proof, b"alice", b"10")?);
//! registry.commit("accounts")?;
//! ```

pub mod config;
pub mod model;
pub mod registry;
pub mod store;
pub mod trie;
pub mod verify;

mod error;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Hash, HashAlgorithm, HashFn, TreeInfo, TREE_HEIGHT};
pub use registry::{pairs_from_columns, Registry};
pub use store::{
    FileMetaStore, FileNodeStore, MemoryMetaStore, MemoryNodeStore, MetaStore, NodeStore,
};
pub use trie::{CompressedMerkleProof, MerkleProof, SparseMerkleTrie};

/// Store format version
pub const VERSION: u32 = 1;

/// Magic bytes for node store files
pub const MAGIC: &[u8; 8] = b"UNITREE\0";
