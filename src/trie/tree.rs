//! Sparse merkle trie engine: batched updates and stash/commit/revert

use super::cache::NodeCache;
use super::node::{internal_hash, leaf_hash};
use super::TrieNode;
use crate::model::{Hash, HashFn, TREE_HEIGHT};
use crate::store::NodeStore;
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// How many stashed roots are retained before the oldest is dropped
pub const MAX_STASHED_ROOTS: usize = 300;

/// A node written since the last commit, with the depth it was written at
#[derive(Clone, Debug)]
struct PendingNode {
    node: TrieNode,
    depth: usize,
}

/// One authenticated key/value tree over a shared node store.
///
/// Keys are normalized with [`trie_key`]: exactly 32-byte keys are used as
/// they are, anything else is hashed with the tree's hash function. An empty
/// value deletes a key.
///
/// The engine is not synchronized; callers serialize access to it.
pub struct SparseMerkleTrie {
    store: Arc<dyn NodeStore>,
    hasher: HashFn,
    root: Hash,
    committed_root: Hash,
    /// Nodes written since the last commit
    pending: HashMap<Hash, PendingNode>,
    cache: NodeCache,
    /// Stashed roots, oldest first
    history: VecDeque<Hash>,
    load_db_counter: u64,
    load_cache_counter: u64,
}

/// Normalize a caller-supplied key to a 32-byte path
pub fn trie_key(hasher: HashFn, raw: &[u8]) -> Result<Hash> {
    match raw.len() {
        0 => Err(Error::Validation("empty key".into())),
        n if n == crate::model::HASH_LEN => Hash::from_slice(raw),
        _ => Ok(hasher(&[raw])),
    }
}

impl SparseMerkleTrie {
    /// Create a new empty trie
    pub fn new(store: Arc<dyn NodeStore>, hasher: HashFn) -> Self {
        Self::from_root(store, hasher, Hash::ZERO)
    }

    /// Open a trie at a root whose nodes are already in the store
    pub fn from_root(store: Arc<dyn NodeStore>, hasher: HashFn, root: Hash) -> Self {
        SparseMerkleTrie {
            store,
            hasher,
            root,
            committed_root: root,
            pending: HashMap::new(),
            cache: NodeCache::new(0),
            history: VecDeque::new(),
            load_db_counter: 0,
            load_cache_counter: 0,
        }
    }

    /// Set the cache height limit (see [`NodeCache`]); clears the cache
    pub fn with_cache_height_limit(mut self, limit: u32) -> Self {
        self.cache = NodeCache::new(limit.min(TREE_HEIGHT as u32));
        self
    }

    /// Resume load counters from persisted metadata
    pub fn with_counters(mut self, load_db: u64, load_cache: u64) -> Self {
        self.load_db_counter = load_db;
        self.load_cache_counter = load_cache;
        self
    }

    // === Accessors ===

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn committed_root(&self) -> Hash {
        self.committed_root
    }

    /// Number of levels in the tree
    pub fn height(&self) -> usize {
        TREE_HEIGHT
    }

    pub fn hasher(&self) -> HashFn {
        self.hasher
    }

    pub fn cache_height_limit(&self) -> u32 {
        self.cache.height_limit()
    }

    pub fn load_db_counter(&self) -> u64 {
        self.load_db_counter
    }

    pub fn load_cache_counter(&self) -> u64 {
        self.load_cache_counter
    }

    /// Roots a revert may target besides the current and committed ones
    pub fn stashed_roots(&self) -> impl Iterator<Item = &Hash> {
        self.history.iter()
    }

    /// Nodes written but not yet committed
    pub fn pending_nodes(&self) -> usize {
        self.pending.len()
    }

    pub fn cached_nodes(&self) -> usize {
        self.cache.len()
    }

    /// Normalize a key with this trie's hash function
    pub fn key(&self, raw: &[u8]) -> Result<Hash> {
        trie_key(self.hasher, raw)
    }

    // === Reads ===

    /// Get the value stored under `key`
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.key(key)?;
        let mut hash = self.root;

        for depth in 0..=TREE_HEIGHT {
            match self.load(&hash, depth)? {
                None => return Ok(None),
                Some(TrieNode::Leaf { key: k, value }) => {
                    return Ok((k == key).then_some(value));
                }
                Some(TrieNode::Internal { .. }) if depth == TREE_HEIGHT => break,
                Some(TrieNode::Internal { left, right }) => {
                    hash = if key.bit(depth) { right } else { left };
                }
            }
        }

        Err(Error::Corruption(format!(
            "path for {} runs deeper than the tree",
            key.short()
        )))
    }

    /// Load a node, or `None` for an empty subtree
    pub(crate) fn load(&mut self, hash: &Hash, depth: usize) -> Result<Option<TrieNode>> {
        if hash.is_zero() {
            return Ok(None);
        }

        if let Some(pending) = self.pending.get(hash) {
            self.load_cache_counter += 1;
            return Ok(Some(pending.node.clone()));
        }

        if let Some(node) = self.cache.get(hash) {
            self.load_cache_counter += 1;
            return Ok(Some(node.clone()));
        }

        let data = self
            .store
            .get(hash)?
            .ok_or_else(|| Error::NotFound(format!("trie node {}", hash)))?;
        self.load_db_counter += 1;

        let node = TrieNode::decode(&data)?;
        self.cache.insert(*hash, node.clone(), depth);
        Ok(Some(node))
    }

    // === Updates ===

    /// Apply a batch of writes, best effort.
    ///
    /// Later duplicates of a key win. Nodes become visible to the trie as
    /// they are produced: if the batch fails half-way the root is unchanged
    /// but some of its nodes may already sit in the pending set.
    pub fn update<K, V>(&mut self, pairs: &[(K, V)]) -> Result<Hash>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = self.normalize(pairs)?;
        batch.reverse();
        batch.sort_by_key(|(k, _)| *k);
        batch.dedup_by_key(|(k, _)| *k);

        let mut writer = Writer::new(self);
        let result = writer.apply(&batch);
        let staged = std::mem::take(&mut writer.staged);
        self.pending.extend(staged);

        self.root = result?;
        Ok(self.root)
    }

    /// Apply a batch of writes, all or nothing.
    ///
    /// The batch is validated before anything is written; on any failure the
    /// root and the pending set are left exactly as they were.
    pub fn atomic_update<K, V>(&mut self, pairs: &[(K, V)]) -> Result<Hash>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = self.normalize(pairs)?;
        batch.sort_by_key(|(k, _)| *k);
        if let Some(w) = batch.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::Validation(format!(
                "duplicate key {} in atomic batch",
                w[0].0
            )));
        }

        let mut writer = Writer::new(self);
        let root = writer.apply(&batch)?;
        let staged = std::mem::take(&mut writer.staged);

        self.pending.extend(staged);
        self.root = root;
        Ok(root)
    }

    fn normalize<K, V>(&self, pairs: &[(K, V)]) -> Result<Vec<(Hash, Vec<u8>)>>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        pairs
            .iter()
            .map(|(k, v)| Ok((self.key(k.as_ref())?, v.as_ref().to_vec())))
            .collect()
    }

    // === Versioning ===

    /// Write every pending node to the store and make the current root the
    /// new commit point. Stashed roots are forgotten.
    pub fn commit(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let batch = self
                .pending
                .iter()
                .map(|(hash, p)| Ok((*hash, p.node.encode()?)))
                .collect::<Result<Vec<_>>>()?;
            self.store.put_batch(batch)?;
        }
        self.store.flush()?;

        for (hash, p) in self.pending.drain() {
            self.cache.insert(hash, p.node, p.depth);
        }
        self.cache.mark();
        self.committed_root = self.root;
        self.history.clear();
        Ok(())
    }

    /// Remember the current root as a revert target.
    ///
    /// With `rollback_cache`, nodes cached since the previous stash or commit
    /// are dropped and will be read from the store again.
    pub fn stash(&mut self, rollback_cache: bool) -> Result<()> {
        if self.history.len() == MAX_STASHED_ROOTS {
            self.history.pop_front();
        }
        self.history.push_back(self.root);

        if rollback_cache {
            self.cache.rollback();
        }
        self.cache.mark();
        Ok(())
    }

    /// Move the root back to the committed root or a stashed one
    pub fn revert(&mut self, to: Hash) -> Result<()> {
        let known =
            to == self.root || to == self.committed_root || self.history.contains(&to);
        if !known {
            return Err(Error::NotFound(format!(
                "root {} is neither committed nor stashed",
                to
            )));
        }

        // make sure the target is still readable
        self.load(&to, 0)?;
        self.root = to;
        Ok(())
    }
}

/// A subtree produced during an update, before it is given a position
enum Subtree {
    Empty,
    /// A lone leaf; hashed once its final depth is known
    Leaf { key: Hash, value: Vec<u8> },
    /// A node that already has its hash
    Stored(Hash),
}

/// Runs one batch against a trie, collecting new nodes in `staged`
struct Writer<'t> {
    trie: &'t mut SparseMerkleTrie,
    staged: HashMap<Hash, PendingNode>,
}

impl<'t> Writer<'t> {
    fn new(trie: &'t mut SparseMerkleTrie) -> Self {
        Writer {
            trie,
            staged: HashMap::new(),
        }
    }

    /// Apply sorted, unique pairs to the trie's root; returns the new root
    fn apply(&mut self, pairs: &[(Hash, Vec<u8>)]) -> Result<Hash> {
        let root = self.trie.root;
        let subtree = self.update(root, 0, pairs)?;
        Ok(self.place(subtree, 0))
    }

    fn load(&mut self, hash: &Hash, depth: usize) -> Result<Option<TrieNode>> {
        if let Some(p) = self.staged.get(hash) {
            return Ok(Some(p.node.clone()));
        }
        self.trie.load(hash, depth)
    }

    fn update(&mut self, node: Hash, depth: usize, pairs: &[(Hash, Vec<u8>)]) -> Result<Subtree> {
        if pairs.is_empty() {
            return Ok(if node.is_zero() {
                Subtree::Empty
            } else {
                Subtree::Stored(node)
            });
        }

        match self.load(&node, depth)? {
            None => {
                let leaves = live(pairs.iter().cloned());
                self.build(depth, &leaves)
            }
            Some(TrieNode::Leaf { key, value }) => {
                let mut merged = pairs.to_vec();
                if let Err(pos) = merged.binary_search_by_key(&key, |(k, _)| *k) {
                    merged.insert(pos, (key, value));
                }
                let leaves = live(merged.into_iter());
                self.build(depth, &leaves)
            }
            Some(TrieNode::Internal { left, right }) => {
                let split = pairs.partition_point(|(k, _)| !k.bit(depth));
                let l = self.update(left, depth + 1, &pairs[..split])?;
                let r = self.update(right, depth + 1, &pairs[split..])?;
                self.combine(l, r, depth)
            }
        }
    }

    /// Build a fresh subtree at `depth` from sorted live leaves
    fn build(&mut self, depth: usize, leaves: &[(Hash, Vec<u8>)]) -> Result<Subtree> {
        match leaves {
            [] => Ok(Subtree::Empty),
            [(key, value)] => Ok(Subtree::Leaf {
                key: *key,
                value: value.clone(),
            }),
            _ => {
                debug_assert!(depth < TREE_HEIGHT, "distinct keys share every bit");
                let split = leaves.partition_point(|(k, _)| !k.bit(depth));
                let l = self.build(depth + 1, &leaves[..split])?;
                let r = self.build(depth + 1, &leaves[split..])?;
                self.combine(l, r, depth)
            }
        }
    }

    /// Join two children into the node at `depth`, collapsing lone leaves upward
    fn combine(&mut self, left: Subtree, right: Subtree, depth: usize) -> Result<Subtree> {
        match (left, right) {
            (Subtree::Empty, Subtree::Empty) => Ok(Subtree::Empty),
            (leaf @ Subtree::Leaf { .. }, Subtree::Empty)
            | (Subtree::Empty, leaf @ Subtree::Leaf { .. }) => Ok(leaf),
            (Subtree::Stored(hash), Subtree::Empty) => self.lift(hash, depth, true),
            (Subtree::Empty, Subtree::Stored(hash)) => self.lift(hash, depth, false),
            (left, right) => {
                let left = self.place(left, depth + 1);
                let right = self.place(right, depth + 1);
                Ok(Subtree::Stored(self.write_internal(left, right, depth)))
            }
        }
    }

    /// A stored child whose sibling became empty: move it up if it is a leaf
    fn lift(&mut self, hash: Hash, depth: usize, is_left: bool) -> Result<Subtree> {
        match self.load(&hash, depth + 1)? {
            Some(TrieNode::Leaf { key, value }) => Ok(Subtree::Leaf { key, value }),
            _ if is_left => Ok(Subtree::Stored(self.write_internal(hash, Hash::ZERO, depth))),
            _ => Ok(Subtree::Stored(self.write_internal(Hash::ZERO, hash, depth))),
        }
    }

    /// Give a subtree its hash at `depth`, writing a leaf node if needed
    fn place(&mut self, subtree: Subtree, depth: usize) -> Hash {
        match subtree {
            Subtree::Empty => Hash::ZERO,
            Subtree::Stored(hash) => hash,
            Subtree::Leaf { key, value } => {
                let hash = leaf_hash(self.trie.hasher, &key, &value, depth);
                self.stage(hash, TrieNode::Leaf { key, value }, depth);
                hash
            }
        }
    }

    fn write_internal(&mut self, left: Hash, right: Hash, depth: usize) -> Hash {
        let hash = internal_hash(self.trie.hasher, &left, &right);
        self.stage(hash, TrieNode::Internal { left, right }, depth);
        hash
    }

    fn stage(&mut self, hash: Hash, node: TrieNode, depth: usize) {
        self.staged.insert(hash, PendingNode { node, depth });
    }
}

/// Drop deletions (empty values) from a sorted batch
fn live(pairs: impl Iterator<Item = (Hash, Vec<u8>)>) -> Vec<(Hash, Vec<u8>)> {
    pairs.filter(|(_, v)| !v.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashAlgorithm;
    use crate::store::MemoryNodeStore;
    use parking_lot::Mutex;

    fn setup() -> (Arc<MemoryNodeStore>, SparseMerkleTrie) {
        let store = Arc::new(MemoryNodeStore::new());
        let trie = SparseMerkleTrie::new(store.clone(), HashAlgorithm::Sha256.hasher());
        (store, trie)
    }

    /// Node store whose reads start failing once armed
    struct FlakyStore {
        inner: MemoryNodeStore,
        fail_reads: Mutex<bool>,
        fail_writes: Mutex<bool>,
    }

    impl FlakyStore {
        fn new() -> Self {
            FlakyStore {
                inner: MemoryNodeStore::new(),
                fail_reads: Mutex::new(false),
                fail_writes: Mutex::new(false),
            }
        }
    }

    impl NodeStore for FlakyStore {
        fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
            if *self.fail_reads.lock() {
                return Err(Error::Storage("disk on fire".into()));
            }
            self.inner.get(hash)
        }

        fn put_batch(&self, entries: Vec<(Hash, Vec<u8>)>) -> Result<()> {
            if *self.fail_writes.lock() {
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.put_batch(entries)
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn key(n: u8) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[0] = n;
        k
    }

    #[test]
    fn test_empty_trie() {
        let (_store, mut trie) = setup();
        assert!(trie.root().is_zero());
        assert_eq!(trie.get(b"missing").unwrap(), None);
        assert_eq!(trie.height(), 256);
    }

    #[test]
    fn test_insert_get() {
        let (_store, mut trie) = setup();
        let root = trie.atomic_update(&[("a", "1"), ("b", "2")]).unwrap();

        assert!(!root.is_zero());
        assert_eq!(trie.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(trie.get(b"c").unwrap(), None);
    }

    #[test]
    fn test_single_leaf_sits_at_root() {
        let (_store, mut trie) = setup();
        let k = key(0x80);
        let root = trie.atomic_update(&[(k, b"v".to_vec())]).unwrap();

        let hasher = trie.hasher();
        assert_eq!(root, leaf_hash(hasher, &Hash::from_bytes(k), b"v", 0));
        assert_eq!(trie.pending_nodes(), 1);
    }

    #[test]
    fn test_two_leaves_diverging_at_first_bit() {
        let (_store, mut trie) = setup();
        let left = key(0x00);
        let right = key(0x80);
        let root = trie
            .atomic_update(&[(left, b"l".to_vec()), (right, b"r".to_vec())])
            .unwrap();

        let hasher = trie.hasher();
        let l = leaf_hash(hasher, &Hash::from_bytes(left), b"l", 1);
        let r = leaf_hash(hasher, &Hash::from_bytes(right), b"r", 1);
        assert_eq!(root, internal_hash(hasher, &l, &r));
    }

    #[test]
    fn test_shared_prefix_creates_internal_chain() {
        let (_store, mut trie) = setup();
        // both keys start with bits 0,0 and differ at bit 2
        let a = key(0b0000_0000);
        let b = key(0b0010_0000);
        let root = trie
            .atomic_update(&[(a, b"a".to_vec()), (b, b"b".to_vec())])
            .unwrap();

        let hasher = trie.hasher();
        let la = leaf_hash(hasher, &Hash::from_bytes(a), b"a", 3);
        let lb = leaf_hash(hasher, &Hash::from_bytes(b), b"b", 3);
        let d2 = internal_hash(hasher, &la, &lb);
        let d1 = internal_hash(hasher, &d2, &Hash::ZERO);
        let d0 = internal_hash(hasher, &d1, &Hash::ZERO);
        assert_eq!(root, d0);
    }

    #[test]
    fn test_order_independence() {
        let pairs: Vec<(String, String)> = (0..64)
            .map(|i| (format!("key-{i}"), format!("value-{i}")))
            .collect();

        let (_s1, mut t1) = setup();
        let r1 = t1.atomic_update(&pairs).unwrap();

        let mut reversed = pairs.clone();
        reversed.reverse();
        let (_s2, mut t2) = setup();
        let r2 = t2.atomic_update(&reversed).unwrap();

        // incremental, in several batches
        let (_s3, mut t3) = setup();
        for chunk in pairs.chunks(7) {
            t3.update(chunk).unwrap();
        }

        assert_eq!(r1, r2);
        assert_eq!(r1, t3.root());
    }

    #[test]
    fn test_delete_restores_previous_root() {
        let (_store, mut trie) = setup();
        let r1 = trie.atomic_update(&[("a", "1"), ("b", "2")]).unwrap();
        trie.atomic_update(&[("c", "3")]).unwrap();
        let r3 = trie.atomic_update(&[("c", "")]).unwrap();

        assert_eq!(r1, r3);
        assert_eq!(trie.get(b"c").unwrap(), None);

        trie.atomic_update(&[("a", ""), ("b", "")]).unwrap();
        assert!(trie.root().is_zero());
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let (_store, mut trie) = setup();
        let r1 = trie.atomic_update(&[("a", "1")]).unwrap();
        let r2 = trie.atomic_update(&[("zzz", "")]).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_overwrite_value() {
        let (_store, mut trie) = setup();
        trie.atomic_update(&[("a", "1"), ("b", "2")]).unwrap();
        trie.atomic_update(&[("a", "9")]).unwrap();
        assert_eq!(trie.get(b"a").unwrap(), Some(b"9".to_vec()));
        assert_eq!(trie.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_update_last_duplicate_wins() {
        let (_store, mut trie) = setup();
        trie.update(&[("a", "1"), ("a", "2")]).unwrap();
        assert_eq!(trie.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_atomic_update_rejects_invalid_batch() {
        let (_store, mut trie) = setup();
        let before = trie.atomic_update(&[("a", "1")]).unwrap();
        let pending = trie.pending_nodes();

        let dup = trie.atomic_update(&[("b", "1"), ("b", "2")]);
        assert!(matches!(dup, Err(Error::Validation(_))));

        let empty_key = trie.atomic_update(&[("", "1")]);
        assert!(matches!(empty_key, Err(Error::Validation(_))));

        assert_eq!(trie.root(), before);
        assert_eq!(trie.pending_nodes(), pending);
    }

    #[test]
    fn test_atomic_update_failure_leaves_no_trace() {
        let store = Arc::new(FlakyStore::new());
        let mut trie = SparseMerkleTrie::new(store.clone(), HashAlgorithm::Sha256.hasher())
            .with_cache_height_limit(TREE_HEIGHT as u32);
        let pairs: Vec<(String, String)> =
            (0..32).map(|i| (format!("k{i}"), format!("v{i}"))).collect();
        trie.atomic_update(&pairs).unwrap();
        trie.commit().unwrap();
        let root = trie.root();

        *store.fail_reads.lock() = true;
        let more: Vec<(String, String)> =
            (0..32).map(|i| (format!("n{i}"), format!("v{i}"))).collect();
        assert!(trie.atomic_update(&more).is_err());

        assert_eq!(trie.root(), root);
        assert_eq!(trie.pending_nodes(), 0);
    }

    #[test]
    fn test_update_failure_keeps_root_but_may_leave_nodes() {
        let store = Arc::new(FlakyStore::new());
        let mut trie = SparseMerkleTrie::new(store.clone(), HashAlgorithm::Sha256.hasher())
            .with_cache_height_limit(TREE_HEIGHT as u32);
        let pairs: Vec<(String, String)> =
            (0..32).map(|i| (format!("k{i}"), format!("v{i}"))).collect();
        trie.update(&pairs).unwrap();
        trie.commit().unwrap();
        let root = trie.root();

        *store.fail_reads.lock() = true;
        let more: Vec<(String, String)> =
            (0..32).map(|i| (format!("n{i}"), format!("v{i}"))).collect();
        assert!(trie.update(&more).is_err());
        assert_eq!(trie.root(), root);
    }

    #[test]
    fn test_commit_persists_nodes() {
        let (store, mut trie) = setup();
        trie.atomic_update(&[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(store.object_count(), 0);

        trie.commit().unwrap();
        assert_eq!(trie.pending_nodes(), 0);
        assert!(store.contains(&trie.root()));
        assert_eq!(trie.committed_root(), trie.root());

        // a fresh engine at that root reads everything from the store
        let mut reopened = SparseMerkleTrie::from_root(
            store.clone(),
            HashAlgorithm::Sha256.hasher(),
            trie.root(),
        );
        assert_eq!(reopened.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(reopened.load_db_counter() > 0);
    }

    #[test]
    fn test_commit_failure_keeps_pending() {
        let store = Arc::new(FlakyStore::new());
        let mut trie = SparseMerkleTrie::new(store.clone(), HashAlgorithm::Sha256.hasher());
        trie.atomic_update(&[("a", "1")]).unwrap();
        trie.stash(false).unwrap();

        *store.fail_writes.lock() = true;
        assert!(trie.commit().is_err());
        assert_eq!(trie.pending_nodes(), 1);
        assert_eq!(trie.stashed_roots().count(), 1);
        assert!(trie.committed_root().is_zero());
    }

    #[test]
    fn test_stash_and_revert() {
        let (_store, mut trie) = setup();
        trie.atomic_update(&[("a", "1")]).unwrap();
        let r2 = trie.atomic_update(&[("b", "2")]).unwrap();
        trie.stash(false).unwrap();
        let r3 = trie.atomic_update(&[("a", "9")]).unwrap();
        assert_ne!(r2, r3);

        trie.revert(r2).unwrap();
        assert_eq!(trie.root(), r2);
        assert_eq!(trie.get(b"a").unwrap(), Some(b"1".to_vec()));

        // again, and to the current root
        trie.revert(r2).unwrap();
        trie.revert(trie.root()).unwrap();
        assert_eq!(trie.root(), r2);
    }

    #[test]
    fn test_revert_rejects_unknown_root() {
        let (_store, mut trie) = setup();
        trie.atomic_update(&[("a", "1")]).unwrap();
        let err = trie.revert(Hash::from_bytes([9u8; 32])).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_revert_to_unstashed_intermediate_root_fails() {
        let (_store, mut trie) = setup();
        let r1 = trie.atomic_update(&[("a", "1")]).unwrap();
        trie.atomic_update(&[("b", "2")]).unwrap();
        // r1 was never stashed or committed
        assert!(trie.revert(r1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_commit_forgets_stash_history() {
        let (_store, mut trie) = setup();
        let r1 = trie.atomic_update(&[("a", "1")]).unwrap();
        trie.stash(false).unwrap();
        let r2 = trie.atomic_update(&[("b", "2")]).unwrap();
        trie.commit().unwrap();

        assert!(trie.revert(r1).unwrap_err().is_not_found());
        trie.revert(r2).unwrap();

        // the committed root stays a valid target after further updates
        trie.atomic_update(&[("c", "3")]).unwrap();
        trie.revert(r2).unwrap();
        assert_eq!(trie.get(b"c").unwrap(), None);
    }

    #[test]
    fn test_stash_history_is_bounded() {
        let (_store, mut trie) = setup();
        let first = trie.atomic_update(&[("k", "0")]).unwrap();
        trie.stash(false).unwrap();
        for i in 1..=MAX_STASHED_ROOTS {
            trie.atomic_update(&[("k", i.to_string())]).unwrap();
            trie.stash(false).unwrap();
        }
        assert_eq!(trie.stashed_roots().count(), MAX_STASHED_ROOTS);
        assert!(trie.revert(first).unwrap_err().is_not_found());
    }

    #[test]
    fn test_stash_rollback_cache_forces_store_reads() {
        let (store, mut trie) = setup();
        trie.atomic_update(&[("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
        trie.commit().unwrap();

        let mut reopened =
            SparseMerkleTrie::from_root(store.clone(), HashAlgorithm::Sha256.hasher(), trie.root());
        reopened.get(b"a").unwrap();
        let db_loads = reopened.load_db_counter();
        assert!(reopened.cached_nodes() > 0);

        reopened.stash(true).unwrap();
        assert_eq!(reopened.cached_nodes(), 0);

        reopened.get(b"a").unwrap();
        assert!(reopened.load_db_counter() > db_loads);

        // cached entries from before a plain stash survive
        reopened.stash(false).unwrap();
        let cached = reopened.cached_nodes();
        reopened.stash(true).unwrap();
        assert_eq!(reopened.cached_nodes(), cached);
    }

    #[test]
    fn test_cache_height_limit_bounds_cache() {
        let (store, mut trie) = setup();
        let pairs: Vec<(String, String)> =
            (0..50).map(|i| (format!("k{i}"), format!("v{i}"))).collect();
        trie.atomic_update(&pairs).unwrap();
        trie.commit().unwrap();

        let root = trie.root();
        let mut unlimited =
            SparseMerkleTrie::from_root(store.clone(), HashAlgorithm::Sha256.hasher(), root);
        let mut root_only =
            SparseMerkleTrie::from_root(store.clone(), HashAlgorithm::Sha256.hasher(), root)
                .with_cache_height_limit(TREE_HEIGHT as u32);

        for (k, _) in &pairs {
            unlimited.get(k.as_bytes()).unwrap();
            root_only.get(k.as_bytes()).unwrap();
        }
        assert_eq!(root_only.cached_nodes(), 1);
        assert!(unlimited.cached_nodes() > 1);
        assert!(root_only.load_db_counter() > unlimited.load_db_counter());
        assert!(root_only.load_cache_counter() > 0);
    }

    #[test]
    fn test_get_on_cyclic_store_reports_corruption() {
        let store = Arc::new(MemoryNodeStore::new());
        let looped = Hash::from_bytes([9u8; 32]);
        let node = TrieNode::Internal {
            left: looped,
            right: looped,
        };
        store.put_batch(vec![(looped, node.encode().unwrap())]).unwrap();

        let mut trie =
            SparseMerkleTrie::from_root(store, HashAlgorithm::Sha256.hasher(), looped);
        assert!(matches!(trie.get(&key(1)), Err(Error::Corruption(_))));
        assert!(matches!(trie.get(&[0xffu8; 32]), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_full_width_keys_are_used_verbatim() {
        let (_store, trie) = setup();
        let raw = [0xabu8; 32];
        assert_eq!(trie.key(&raw).unwrap(), Hash::from_bytes(raw));
        assert_ne!(trie.key(b"short").unwrap(), Hash::ZERO);
        assert!(trie.key(b"").is_err());
    }
}
