//! `cache_index.json`: one record per cache entry

use super::manifest::{sync_dir, write_synced};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "cache_index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub stage: String,
    pub config_slug: String,
    pub item_key: String,
    pub artifacts: Vec<String>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    pub created: DateTime<Utc>,
    /// Keyed by `stage/slug/item`
    pub entries: BTreeMap<String, IndexRecord>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            created: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    pub fn path(root: &Path) -> PathBuf {
        root.join(INDEX_FILE)
    }

    /// Read the index. `Ok(None)` when the file does not exist.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Replace the index file atomically (temp file, fsync, rename)
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let tmp = root.join(format!(".{}.tmp", INDEX_FILE));
        let content = serde_json::to_vec_pretty(self)?;
        write_synced(&tmp, &content)?;
        std::fs::rename(&tmp, &path)?;
        sync_dir(root)?;
        Ok(())
    }
}
