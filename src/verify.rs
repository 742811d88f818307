//! Stateless proof verification
//!
//! These functions need only a root hash and the tree's hash function, so a
//! client holding a proof can check it without any store or engine.

use crate::model::{Hash, HashFn, TREE_HEIGHT};
use crate::trie::{internal_hash, leaf_hash, BITMAP_LEN};

/// Fold a leaf-first audit path from `start` (the hash at the bottom of the
/// path) up to a candidate root
fn fold(hasher: HashFn, start: Hash, audit_path: &[Hash], key: &Hash) -> Hash {
    let n = audit_path.len();
    audit_path
        .iter()
        .enumerate()
        .fold(start, |current, (i, sibling)| {
            // the parent of this level sits at depth n - 1 - i
            if key.bit(n - 1 - i) {
                internal_hash(hasher, sibling, &current)
            } else {
                internal_hash(hasher, &current, sibling)
            }
        })
}

/// Check that `key` holds `value` under `root`
pub fn verify_inclusion(
    hasher: HashFn,
    root: &Hash,
    audit_path: &[Hash],
    key: &Hash,
    value: &[u8],
) -> bool {
    if value.is_empty() || audit_path.len() > TREE_HEIGHT {
        return false;
    }
    let leaf = leaf_hash(hasher, key, value, audit_path.len());
    fold(hasher, leaf, audit_path, key) == *root
}

/// Check that `key` is absent under `root`.
///
/// The path ends either in an empty subtree (`proof_key` is `None`) or in a
/// leaf for a different key sharing the path's prefix.
pub fn verify_non_inclusion(
    hasher: HashFn,
    root: &Hash,
    audit_path: &[Hash],
    key: &Hash,
    proof_key: Option<&Hash>,
    proof_value: &[u8],
) -> bool {
    if audit_path.len() > TREE_HEIGHT {
        return false;
    }

    let Some(proof_key) = proof_key else {
        return fold(hasher, Hash::ZERO, audit_path, key) == *root;
    };

    if proof_key == key || !proof_key.shares_prefix(key, audit_path.len()) {
        return false;
    }
    verify_inclusion(hasher, root, audit_path, proof_key, proof_value)
}

/// Rebuild a full leaf-first audit path from a compressed one.
///
/// Returns `None` when the bitmap is malformed or does not account for every
/// supplied sibling.
pub fn decompress(bitmap: &[u8], audit_path: &[Hash], height: u32) -> Option<Vec<Hash>> {
    let height = height as usize;
    if bitmap.len() != BITMAP_LEN || height > TREE_HEIGHT {
        return None;
    }

    // walk root to leaf; compressed siblings are consumed from the root end
    let mut remaining = audit_path.iter().rev();
    let mut full = Vec::with_capacity(height);
    for depth in 0..height {
        let is_default = bitmap[depth / 8] & (0x80 >> (depth % 8)) != 0;
        if is_default {
            full.push(Hash::ZERO);
        } else {
            full.push(*remaining.next()?);
        }
    }

    if remaining.next().is_some() {
        return None;
    }
    full.reverse();
    Some(full)
}

/// [`verify_inclusion`] for a bitmap-compressed path
pub fn verify_inclusion_compressed(
    hasher: HashFn,
    root: &Hash,
    bitmap: &[u8],
    audit_path: &[Hash],
    height: u32,
    key: &Hash,
    value: &[u8],
) -> bool {
    match decompress(bitmap, audit_path, height) {
        Some(path) => verify_inclusion(hasher, root, &path, key, value),
        None => false,
    }
}

/// [`verify_non_inclusion`] for a bitmap-compressed path
#[allow(clippy::too_many_arguments)]
pub fn verify_non_inclusion_compressed(
    hasher: HashFn,
    root: &Hash,
    bitmap: &[u8],
    audit_path: &[Hash],
    height: u32,
    key: &Hash,
    proof_key: Option<&Hash>,
    proof_value: &[u8],
) -> bool {
    match decompress(bitmap, audit_path, height) {
        Some(path) => verify_non_inclusion(hasher, root, &path, key, proof_key, proof_value),
        None => false,
    }
}
