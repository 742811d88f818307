//! Metadata layout: the tree-name list and one info record per tree

use crate::model::TreeInfo;
use crate::store::MetaStore;
use crate::{Error, Result};

/// Key of the JSON list of tree names
pub const TREES_KEY: &str = "tries";

const INFO_PREFIX: &str = "info:";

pub fn info_key(name: &str) -> String {
    format!("{}{}", INFO_PREFIX, name)
}

/// Read the persisted tree names; a fresh store has none
pub fn load_names(meta: &dyn MetaStore) -> Result<Vec<String>> {
    match meta.get(TREES_KEY)? {
        Some(data) => Ok(serde_json::from_slice(&data)?),
        None => Ok(Vec::new()),
    }
}

pub fn save_names(meta: &dyn MetaStore, names: &[String]) -> Result<()> {
    meta.set(TREES_KEY, serde_json::to_vec(names)?)
}

/// Read the info record of a listed tree; a listed tree without one is
/// corrupt metadata
pub fn load_info(meta: &dyn MetaStore, name: &str) -> Result<TreeInfo> {
    let data = meta.get(&info_key(name))?.ok_or_else(|| {
        Error::Corruption(format!("tree [{}] is listed but has no info record", name))
    })?;
    let info = TreeInfo::from_bytes(&data)?;
    if info.name != name {
        return Err(Error::Corruption(format!(
            "info record for [{}] names tree [{}]",
            name, info.name
        )));
    }
    Ok(info)
}

pub fn save_info(meta: &dyn MetaStore, info: &TreeInfo) -> Result<()> {
    meta.set(&info_key(&info.name), info.to_bytes()?)
}

pub fn delete_info(meta: &dyn MetaStore, name: &str) -> Result<()> {
    meta.delete(&info_key(name))
}
