//! Storage collaborators
//!
//! The trie engine only sees the [`NodeStore`] contract: a content-addressed
//! byte store keyed by node hash. The registry only sees [`MetaStore`]: a
//! small key/value store for per-tree metadata. Each has a single-file
//! implementation and an in-memory one.

mod blob;
mod file_store;
mod memory;
mod meta_store;

pub use blob::{Blob, BlobEncoding};
pub use file_store::FileNodeStore;
pub use memory::{MemoryMetaStore, MemoryNodeStore};
pub use meta_store::FileMetaStore;

use crate::model::Hash;
use crate::Result;

/// Content-addressed node storage shared by every tree
pub trait NodeStore: Send + Sync {
    /// Read a node body by hash
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;

    /// Write a batch of nodes. Either every entry becomes readable or none does.
    fn put_batch(&self, entries: Vec<(Hash, Vec<u8>)>) -> Result<()>;

    /// Make every written batch durable
    fn flush(&self) -> Result<()>;

    /// Flush and refuse further writes
    fn close(&self) -> Result<()>;
}

/// Metadata storage for tree descriptions. Every call is its own transaction.
pub trait MetaStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}
