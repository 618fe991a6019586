//! Per-entry manifest: metadata plus artifact digests

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File name of the manifest inside an entry directory. Reserved; no artifact
/// may use it.
pub const MANIFEST_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub metadata: serde_json::Value,
    pub artifacts: BTreeMap<String, ArtifactDigest>,
    pub saved_at: DateTime<Utc>,
}

impl Manifest {
    pub fn read(entry_dir: &Path) -> Result<Self> {
        let content = std::fs::read(entry_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Write the manifest and flush it to disk
    pub fn write(&self, entry_dir: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        write_synced(&entry_dir.join(MANIFEST_FILE), &content)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Write a file and fsync it before returning
pub fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}

/// Flush directory metadata (renames, new entries). No-op where directories
/// cannot be opened as files.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
