//! Core data model types for unitree_db

mod hash;
mod tree_info;

pub use hash::{Hash, HashAlgorithm, HashFn, HASH_LEN, TREE_HEIGHT};
pub use tree_info::TreeInfo;
