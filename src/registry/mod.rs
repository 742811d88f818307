//! Tree registry
//!
//! Maps tree names to live engines, keeps their metadata in sync with the
//! metadata store and rebuilds every engine on open. All trees share one
//! node store.
//!
//! Every operation takes the registry lock for its whole duration, so calls
//! are serialized across trees.

mod meta;

pub use meta::{info_key, TREES_KEY};

use crate::config::Config;
use crate::model::{Hash, HashAlgorithm, TreeInfo, TREE_HEIGHT};
use crate::store::{FileMetaStore, FileNodeStore, MemoryMetaStore, MemoryNodeStore};
use crate::store::{MetaStore, NodeStore};
use crate::trie::{CompressedMerkleProof, MerkleProof, SparseMerkleTrie};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A live tree and the hash function it was created with
struct TreeEntry {
    trie: SparseMerkleTrie,
    hash: HashAlgorithm,
}

impl TreeEntry {
    fn info(&self, name: &str) -> TreeInfo {
        TreeInfo {
            name: name.to_string(),
            root: self.trie.root(),
            committed_root: self.trie.committed_root(),
            height: self.trie.height() as u32,
            load_db_counter: self.trie.load_db_counter(),
            load_cache_counter: self.trie.load_cache_counter(),
            cache_height_limit: self.trie.cache_height_limit(),
            hash: self.hash,
        }
    }
}

struct State {
    trees: BTreeMap<String, TreeEntry>,
    shutdown: bool,
}

/// The set of named trees over one node store and one metadata store
pub struct Registry {
    nodes: Arc<dyn NodeStore>,
    meta: Box<dyn MetaStore>,
    default_hash: HashAlgorithm,
    state: Mutex<State>,
}

impl Registry {
    /// Open a registry over existing stores, rebuilding every listed tree
    pub fn open(nodes: Arc<dyn NodeStore>, meta_store: Box<dyn MetaStore>) -> Result<Self> {
        let names = meta::load_names(meta_store.as_ref())?;
        info!("Loading {} trees from metadata", names.len());

        let mut trees = BTreeMap::new();
        for name in names {
            let info = meta::load_info(meta_store.as_ref(), &name)?;
            let entry = Self::reload(&nodes, &info)?;
            trees.insert(name, entry);
        }

        Ok(Registry {
            nodes,
            meta: meta_store,
            default_hash: HashAlgorithm::default(),
            state: Mutex::new(State {
                trees,
                shutdown: false,
            }),
        })
    }

    /// Open the file-backed registry in `config.data_dir`, creating it if needed
    pub fn open_dir(config: &Config) -> Result<Self> {
        config.ensure_dir()?;
        let nodes = Arc::new(FileNodeStore::open_or_create(config.nodes_path())?);
        let meta = Box::new(FileMetaStore::open(config.meta_path())?);
        info!("Opened data directory {}", config.data_dir().display());
        Ok(Self::open(nodes, meta)?.with_default_hash(config.hash))
    }

    /// A registry held entirely in memory
    pub fn in_memory() -> Self {
        Registry {
            nodes: Arc::new(MemoryNodeStore::new()),
            meta: Box::new(MemoryMetaStore::new()),
            default_hash: HashAlgorithm::default(),
            state: Mutex::new(State {
                trees: BTreeMap::new(),
                shutdown: false,
            }),
        }
    }

    /// Hash function for trees created with [`Registry::create_tree`]
    pub fn with_default_hash(mut self, hash: HashAlgorithm) -> Self {
        self.default_hash = hash;
        self
    }

    /// Rebuild one engine from its persisted description.
    ///
    /// The last known root is used when its node made it to the store;
    /// otherwise the uncommitted tail was lost and the tree falls back to its
    /// committed root, or to empty.
    fn reload(nodes: &Arc<dyn NodeStore>, info: &TreeInfo) -> Result<TreeEntry> {
        if info.height as usize != TREE_HEIGHT {
            return Err(Error::Corruption(format!(
                "tree [{}] has height {}, expected {}",
                info.name, info.height, TREE_HEIGHT
            )));
        }

        let available = |root: &Hash| -> Result<bool> {
            Ok(root.is_zero() || nodes.get(root)?.is_some())
        };

        let root = if available(&info.root)? {
            info.root
        } else if available(&info.committed_root)? {
            warn!(
                "Tree [{}]: root {} was never committed, using committed root {}",
                info.name,
                info.root.short(),
                info.committed_root.short()
            );
            info.committed_root
        } else {
            warn!(
                "Tree [{}]: no root is available in the node store, starting empty",
                info.name
            );
            Hash::ZERO
        };

        info!(
            "Loaded tree [{}] root={} hash={} load_db={} load_cache={} cache_height_limit={}",
            info.name,
            root,
            info.hash,
            info.load_db_counter,
            info.load_cache_counter,
            info.cache_height_limit
        );

        let trie = SparseMerkleTrie::from_root(nodes.clone(), info.hash.hasher(), root)
            .with_cache_height_limit(info.cache_height_limit)
            .with_counters(info.load_db_counter, info.load_cache_counter);
        Ok(TreeEntry {
            trie,
            hash: info.hash,
        })
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.shutdown {
            return Err(Error::ShutDown);
        }
        Ok(state)
    }

    /// Persist every tree's info record, then the tree list. Expects the lock.
    fn sync_locked(&self, state: &State) -> Result<()> {
        for (name, entry) in &state.trees {
            meta::save_info(self.meta.as_ref(), &entry.info(name))?;
        }
        let names: Vec<String> = state.trees.keys().cloned().collect();
        meta::save_names(self.meta.as_ref(), &names)
    }

    /// Run `f` against one tree, optionally syncing metadata afterwards
    fn with_tree<T>(
        &self,
        name: &str,
        sync: bool,
        f: impl FnOnce(&mut SparseMerkleTrie) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock()?;
        let entry = state
            .trees
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("tree [{}]", name)))?;
        let out = f(&mut entry.trie)?;
        if sync {
            self.sync_locked(&state)?;
        }
        Ok(out)
    }

    // === Tree management ===

    /// Live description of every tree, sorted by name
    pub fn list_trees(&self) -> Result<Vec<TreeInfo>> {
        let state = self.lock()?;
        Ok(state
            .trees
            .iter()
            .map(|(name, entry)| entry.info(name))
            .collect())
    }

    /// Live description of one tree
    pub fn tree_info(&self, name: &str) -> Result<TreeInfo> {
        let state = self.lock()?;
        state
            .trees
            .get(name)
            .map(|entry| entry.info(name))
            .ok_or_else(|| Error::NotFound(format!("tree [{}]", name)))
    }

    /// Create an empty tree with the registry's default hash function.
    /// Returns `false` if the name is taken.
    pub fn create_tree(&self, name: &str, cache_height_limit: u32) -> Result<bool> {
        self.create_tree_with(name, cache_height_limit, self.default_hash)
    }

    /// Create an empty tree with an explicit hash function
    pub fn create_tree_with(
        &self,
        name: &str,
        cache_height_limit: u32,
        hash: HashAlgorithm,
    ) -> Result<bool> {
        if name.is_empty() {
            return Err(Error::Validation("tree name must not be empty".into()));
        }
        if cache_height_limit as usize > TREE_HEIGHT {
            return Err(Error::Validation(format!(
                "cache height limit {} exceeds tree height {}",
                cache_height_limit, TREE_HEIGHT
            )));
        }

        let mut state = self.lock()?;
        if state.trees.contains_key(name) {
            info!("Tree [{}] already exists", name);
            return Ok(false);
        }

        info!(
            "Creating tree [{}] hash={} cache_height_limit={}",
            name, hash, cache_height_limit
        );
        let trie = SparseMerkleTrie::new(self.nodes.clone(), hash.hasher())
            .with_cache_height_limit(cache_height_limit);
        state.trees.insert(name.to_string(), TreeEntry { trie, hash });
        self.sync_locked(&state)?;
        Ok(true)
    }

    /// Forget a tree. Its nodes stay in the shared node store.
    /// Returns `false` if there was no such tree.
    pub fn drop_tree(&self, name: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state.trees.remove(name).is_none() {
            info!("Tree [{}] not found, nothing to drop", name);
            return Ok(false);
        }

        info!("Dropping tree [{}]", name);
        meta::delete_info(self.meta.as_ref(), name)?;
        self.sync_locked(&state)?;
        Ok(true)
    }

    /// Persist every tree's current state and the tree list
    pub fn sync_meta(&self) -> Result<()> {
        let state = self.lock()?;
        self.sync_locked(&state)
    }

    // === Engine operations ===

    /// Best-effort batch write; see [`SparseMerkleTrie::update`]
    pub fn update<K, V>(&self, name: &str, pairs: &[(K, V)]) -> Result<Hash>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.with_tree(name, true, |trie| {
            debug!("Update [{}]: root before {}", name, trie.root());
            let root = trie.update(pairs)?;
            info!("Update [{}]: {} pairs, root {}", name, pairs.len(), root);
            Ok(root)
        })
    }

    /// All-or-nothing batch write; see [`SparseMerkleTrie::atomic_update`]
    pub fn atomic_update<K, V>(&self, name: &str, pairs: &[(K, V)]) -> Result<Hash>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.with_tree(name, true, |trie| {
            debug!("AtomicUpdate [{}]: root before {}", name, trie.root());
            let root = trie.atomic_update(pairs)?;
            info!("AtomicUpdate [{}]: {} pairs, root {}", name, pairs.len(), root);
            Ok(root)
        })
    }

    /// Value stored under `key`; `NotFound` if absent
    pub fn get(&self, name: &str, key: &[u8]) -> Result<Vec<u8>> {
        self.with_tree(name, false, |trie| {
            trie.get(key)?.ok_or_else(|| {
                Error::NotFound(format!("key {} in tree [{}]", hex::encode(key), name))
            })
        })
    }

    pub fn commit(&self, name: &str) -> Result<()> {
        self.with_tree(name, true, |trie| {
            trie.commit()?;
            info!("Commit [{}]: root {}", name, trie.root());
            Ok(())
        })
    }

    pub fn stash(&self, name: &str, rollback_cache: bool) -> Result<()> {
        self.with_tree(name, true, |trie| {
            trie.stash(rollback_cache)?;
            info!(
                "Stash [{}]: root {} rollback_cache={}",
                name,
                trie.root(),
                rollback_cache
            );
            Ok(())
        })
    }

    pub fn revert(&self, name: &str, root: Hash) -> Result<()> {
        self.with_tree(name, true, |trie| {
            trie.revert(root)?;
            info!("Revert [{}]: root {}", name, root);
            Ok(())
        })
    }

    pub fn merkle_proof(&self, name: &str, key: &[u8]) -> Result<MerkleProof> {
        self.with_tree(name, false, |trie| {
            let proof = trie.merkle_proof(key)?;
            debug!(
                "MerkleProof [{}]: included={} depth={}",
                name,
                proof.included,
                proof.depth()
            );
            Ok(proof)
        })
    }

    pub fn merkle_proof_compressed(
        &self,
        name: &str,
        key: &[u8],
    ) -> Result<CompressedMerkleProof> {
        self.with_tree(name, false, |trie| {
            let proof = trie.merkle_proof_compressed(key)?;
            debug!(
                "MerkleProofCompressed [{}]: included={} height={}",
                name, proof.included, proof.height
            );
            Ok(proof)
        })
    }

    pub fn merkle_proof_r(&self, name: &str, key: &[u8], root: Hash) -> Result<MerkleProof> {
        self.with_tree(name, false, |trie| {
            debug!("MerkleProofR [{}]: root {}", name, root);
            trie.merkle_proof_r(key, root)
        })
    }

    pub fn merkle_proof_compressed_r(
        &self,
        name: &str,
        key: &[u8],
        root: Hash,
    ) -> Result<CompressedMerkleProof> {
        self.with_tree(name, false, |trie| {
            debug!("MerkleProofCompressedR [{}]: root {}", name, root);
            trie.merkle_proof_compressed_r(key, root)
        })
    }

    /// Check an inclusion proof against the tree's current root
    pub fn verify_inclusion(
        &self,
        name: &str,
        proof: &MerkleProof,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        self.with_tree(name, false, |trie| trie.verify_inclusion(proof, key, value))
    }

    /// Check a non-inclusion proof against the tree's current root
    pub fn verify_non_inclusion(
        &self,
        name: &str,
        proof: &MerkleProof,
        key: &[u8],
    ) -> Result<bool> {
        self.with_tree(name, false, |trie| trie.verify_non_inclusion(proof, key))
    }

    pub fn verify_inclusion_compressed(
        &self,
        name: &str,
        proof: &CompressedMerkleProof,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        self.with_tree(name, false, |trie| {
            trie.verify_inclusion_compressed(proof, key, value)
        })
    }

    pub fn verify_non_inclusion_compressed(
        &self,
        name: &str,
        proof: &CompressedMerkleProof,
        key: &[u8],
    ) -> Result<bool> {
        self.with_tree(name, false, |trie| {
            trie.verify_non_inclusion_compressed(proof, key)
        })
    }

    // === Lifecycle ===

    /// Commit every tree, persist metadata and close the node store.
    ///
    /// Commit failures are logged and do not stop the shutdown. Calling this
    /// again is a no-op; every other operation fails with `ShutDown` after.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Ok(());
        }

        info!("Shutting down {} trees", state.trees.len());
        for (name, entry) in state.trees.iter_mut() {
            if let Err(e) = entry.trie.commit() {
                warn!("Could not commit tree [{}]: {}", name, e);
            }
        }

        let synced = self.sync_locked(&state);
        match &synced {
            Ok(()) => info!("Metadata synced"),
            Err(e) => warn!("Could not sync metadata: {}", e),
        }

        // a failed close still ends the registry
        state.shutdown = true;
        self.nodes.close()?;
        info!("Node store closed");
        synced
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Zip parallel key and value columns into pairs
pub fn pairs_from_columns(
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if keys.len() != values.len() {
        return Err(Error::Validation(format!(
            "{} keys but {} values",
            keys.len(),
            values.len()
        )));
    }
    Ok(keys.into_iter().zip(values).collect())
}
