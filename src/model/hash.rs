//! 32-byte hash type and the pluggable hash functions a tree can use

use blake2::digest::consts::U32;
use blake2::Blake2b;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Output width of every supported hash function, in bytes
pub const HASH_LEN: usize = 32;

/// Number of levels in a tree keyed by `HASH_LEN`-byte keys
pub const TREE_HEIGHT: usize = HASH_LEN * 8;

/// A 32-byte hash, used both as node identity and as tree key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// The zero hash: the empty-tree root and the Default node at every level
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Create a hash from a slice, which must be exactly `HASH_LEN` bytes
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            crate::Error::Validation(format!(
                "expected {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            ))
        })?;
        Ok(Hash(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        if bytes.len() != HASH_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    /// Get a short prefix for display (first 7 chars, like git)
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }

    /// Check if this is the zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// Bit at `depth` along the key path, MSB first. `true` means "go right".
    pub fn bit(&self, depth: usize) -> bool {
        self.0[depth / 8] & (1 << (7 - depth % 8)) != 0
    }

    /// Whether the first `bits` bits of both hashes agree
    pub fn shares_prefix(&self, other: &Hash, bits: usize) -> bool {
        (0..bits).all(|d| self.bit(d) == other.bit(d))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A hash function over a sequence of byte parts, fed in order.
///
/// Supplied to an engine at construction and fixed for its lifetime.
pub type HashFn = fn(&[&[u8]]) -> Hash;

/// The hash functions a tree can be created with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake2b,
    Blake3,
}

impl HashAlgorithm {
    /// The function implementing this algorithm
    pub fn hasher(self) -> HashFn {
        match self {
            HashAlgorithm::Sha256 => sha256_digest,
            HashAlgorithm::Blake2b => blake2b_digest,
            HashAlgorithm::Blake3 => blake3_digest,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake2b => "blake2b",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake2b" => Ok(HashAlgorithm::Blake2b),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(crate::Error::Validation(format!(
                "unknown hash algorithm: {}",
                other
            ))),
        }
    }
}

fn sha256_digest(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

fn blake2b_digest(parts: &[&[u8]]) -> Hash {
    let mut hasher = Blake2b::<U32>::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

fn blake3_digest(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(*hasher.finalize().as_bytes())
}
