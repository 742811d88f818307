//! Inclusion and non-inclusion proofs

use super::tree::SparseMerkleTrie;
use super::TrieNode;
use crate::model::{Hash, TREE_HEIGHT};
use crate::verify;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Bytes in a compressed proof bitmap, one bit per level
pub const BITMAP_LEN: usize = TREE_HEIGHT / 8;

/// A merkle proof with one sibling per level traversed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Sibling hashes, leaf first; empty siblings appear as the zero hash
    pub audit_path: Vec<Hash>,
    /// Whether the queried key is present
    pub included: bool,
    /// Key of the leaf found at the end of the path, if any
    pub proof_key: Option<Hash>,
    /// Value of that leaf (empty when there is none)
    pub proof_value: Vec<u8>,
}

/// A merkle proof with empty siblings elided and flagged in a bitmap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedMerkleProof {
    /// Bit `d` (MSB first) is set when the sibling at depth `d` is empty
    pub bitmap: Vec<u8>,
    /// Non-empty sibling hashes, leaf first
    pub audit_path: Vec<Hash>,
    /// Levels traversed
    pub height: u32,
    pub included: bool,
    pub proof_key: Option<Hash>,
    pub proof_value: Vec<u8>,
}

impl MerkleProof {
    /// Depth of the leaf (or empty subtree) the proof ends at
    pub fn depth(&self) -> usize {
        self.audit_path.len()
    }

    /// Elide empty siblings
    pub fn compress(&self) -> CompressedMerkleProof {
        let mut bitmap = vec![0u8; BITMAP_LEN];
        // audit_path is leaf first, depths count from the root
        let n = self.audit_path.len();
        for (i, sibling) in self.audit_path.iter().enumerate() {
            if sibling.is_zero() {
                let depth = n - 1 - i;
                bitmap[depth / 8] |= 0x80 >> (depth % 8);
            }
        }

        CompressedMerkleProof {
            bitmap,
            audit_path: self
                .audit_path
                .iter()
                .filter(|h| !h.is_zero())
                .copied()
                .collect(),
            height: n as u32,
            included: self.included,
            proof_key: self.proof_key,
            proof_value: self.proof_value.clone(),
        }
    }
}

impl CompressedMerkleProof {
    /// Expand into a plain proof; `None` if the bitmap and path disagree
    pub fn decompress(&self) -> Option<MerkleProof> {
        let audit_path = verify::decompress(&self.bitmap, &self.audit_path, self.height)?;
        Some(MerkleProof {
            audit_path,
            included: self.included,
            proof_key: self.proof_key,
            proof_value: self.proof_value.clone(),
        })
    }

    /// Number of empty siblings flagged in the bitmap
    pub fn default_siblings(&self) -> u32 {
        self.bitmap.iter().map(|b| b.count_ones()).sum()
    }
}

impl SparseMerkleTrie {
    /// Proof for `key` against the current root
    pub fn merkle_proof(&mut self, key: &[u8]) -> Result<MerkleProof> {
        let root = self.root();
        self.merkle_proof_r(key, root)
    }

    /// Compressed proof for `key` against the current root
    pub fn merkle_proof_compressed(&mut self, key: &[u8]) -> Result<CompressedMerkleProof> {
        let root = self.root();
        self.merkle_proof_compressed_r(key, root)
    }

    /// Proof for `key` against an explicit, possibly historical, root
    pub fn merkle_proof_r(&mut self, key: &[u8], root: Hash) -> Result<MerkleProof> {
        let key = self.key(key)?;
        let mut siblings = Vec::new();
        let mut hash = root;

        let terminal = loop {
            let depth = siblings.len();
            match self.load(&hash, depth)? {
                None => break None,
                Some(TrieNode::Leaf { key: found, value }) => break Some((found, value)),
                Some(TrieNode::Internal { left, right }) => {
                    if depth == TREE_HEIGHT {
                        return Err(Error::Corruption(format!(
                            "internal node {} below the leaf level",
                            hash
                        )));
                    }
                    let (next, sibling) = if key.bit(depth) {
                        (right, left)
                    } else {
                        (left, right)
                    };
                    siblings.push(sibling);
                    hash = next;
                }
            }
        };

        siblings.reverse();
        let proof = match terminal {
            Some((found, value)) => MerkleProof {
                audit_path: siblings,
                included: found == key,
                proof_key: Some(found),
                proof_value: value,
            },
            None => MerkleProof {
                audit_path: siblings,
                included: false,
                proof_key: None,
                proof_value: Vec::new(),
            },
        };
        Ok(proof)
    }

    /// Compressed proof for `key` against an explicit root
    pub fn merkle_proof_compressed_r(
        &mut self,
        key: &[u8],
        root: Hash,
    ) -> Result<CompressedMerkleProof> {
        Ok(self.merkle_proof_r(key, root)?.compress())
    }

    /// Check an inclusion proof against the current root
    pub fn verify_inclusion(&self, proof: &MerkleProof, key: &[u8], value: &[u8]) -> Result<bool> {
        let key = self.key(key)?;
        Ok(verify::verify_inclusion(
            self.hasher(),
            &self.root(),
            &proof.audit_path,
            &key,
            value,
        ))
    }

    /// Check a non-inclusion proof against the current root
    pub fn verify_non_inclusion(&self, proof: &MerkleProof, key: &[u8]) -> Result<bool> {
        let key = self.key(key)?;
        Ok(verify::verify_non_inclusion(
            self.hasher(),
            &self.root(),
            &proof.audit_path,
            &key,
            proof.proof_key.as_ref(),
            &proof.proof_value,
        ))
    }

    pub fn verify_inclusion_compressed(
        &self,
        proof: &CompressedMerkleProof,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        match proof.decompress() {
            Some(plain) => self.verify_inclusion(&plain, key, value),
            None => Ok(false),
        }
    }

    pub fn verify_non_inclusion_compressed(
        &self,
        proof: &CompressedMerkleProof,
        key: &[u8],
    ) -> Result<bool> {
        match proof.decompress() {
            Some(plain) => self.verify_non_inclusion(&plain, key),
            None => Ok(false),
        }
    }
}
