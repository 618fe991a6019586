//! Staged artifact cache
//!
//! Stores the output of expensive deterministic extraction steps so they are
//! never recomputed. An entry is addressed by `(stage, config_slug, item_key)`
//! and lives in `<root>/<stage>/<config_slug>/<item_key>/` as one file per
//! artifact plus a `metadata.json` manifest carrying caller metadata and a
//! SHA-256 digest per artifact. `<root>/cache_index.json` records every entry.
//!
//! Writes are assembled in a `.staging-*` directory beside the final location
//! and renamed into place. A previous entry is first renamed to `.retired-*`
//! and deleted only once the replacement has landed, so a crash at any point
//! leaves either the old or the new entry readable. [`StagedCache::open`]
//! finishes or rolls back any interrupted swap.

mod fill;
mod index;
mod key;
mod manifest;

pub use fill::{fill_missing, CacheSlot, Computed};
pub use index::{IndexRecord, INDEX_FILE};
pub use key::validate_component;
pub use manifest::{ArtifactDigest, Manifest, MANIFEST_FILE};

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use index::CacheIndex;
use key::{index_key, validate_key};
use manifest::{sha256_hex, sync_dir, write_synced};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// Named artifact payloads of one entry
pub type Artifacts = BTreeMap<String, Vec<u8>>;

/// Serialize a value as a JSON artifact payload
pub fn json_artifact<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// A verified cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub stage: String,
    pub config_slug: String,
    pub item_key: String,
    pub artifacts: Artifacts,
    pub metadata: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn artifact(&self, name: &str) -> Option<&[u8]> {
        self.artifacts.get(name).map(Vec::as_slice)
    }

    /// Decode a JSON artifact. `Ok(None)` if the entry has no such artifact.
    pub fn artifact_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.artifacts.get(name) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }
}

/// Result of a cache read. A missing or unusable entry is `Absent`, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Present(CacheEntry),
    Absent,
}

impl CacheLookup {
    pub fn is_present(&self) -> bool {
        matches!(self, CacheLookup::Present(_))
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            CacheLookup::Present(entry) => Some(entry),
            CacheLookup::Absent => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub per_stage: BTreeMap<String, usize>,
    /// Keyed by `stage/config_slug`
    pub per_config: BTreeMap<String, usize>,
    pub total_bytes: u64,
}

/// Handle to a cache tree. Cheap to clone; clones share the index writer.
#[derive(Debug, Clone)]
pub struct StagedCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    index: Mutex<CacheIndex>,
}

impl StagedCache {
    /// Open (creating if needed) the cache rooted at `root`.
    ///
    /// Restores retired entries whose replacement never landed, removes
    /// abandoned staging directories, and rebuilds the index from the entry
    /// manifests if the index file is missing or unreadable.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        recover_interrupted_writes(&root)?;

        let index = match CacheIndex::load(&root) {
            Ok(Some(index)) => index,
            Ok(None) => {
                let index = scan_entries(&root)?;
                index.save(&root)?;
                index
            }
            Err(e) => {
                warn!(
                    root = %root.display(),
                    error = %e,
                    "Cache index unreadable, rebuilding from entry manifests"
                );
                let index = scan_entries(&root)?;
                index.save(&root)?;
                index
            }
        };

        info!(
            root = %root.display(),
            entries = index.entries.len(),
            "Opened staged cache"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                index: Mutex::new(index),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn entry_dir(&self, stage: &str, config_slug: &str, item_key: &str) -> PathBuf {
        self.inner.root.join(stage).join(config_slug).join(item_key)
    }

    fn lock_index(&self) -> Result<MutexGuard<'_, CacheIndex>> {
        self.inner
            .index
            .lock()
            .map_err(|_| Error::Internal("cache index lock poisoned".to_string()))
    }

    /// Store an entry, replacing any previous entry under the same key
    pub fn put(
        &self,
        stage: &str,
        config_slug: &str,
        item_key: &str,
        artifacts: &Artifacts,
        metadata: serde_json::Value,
    ) -> Result<()> {
        validate_key(stage, config_slug, item_key)?;
        for name in artifacts.keys() {
            validate_component("artifact name", name)?;
            if name == MANIFEST_FILE {
                return Err(Error::InvalidInput(format!(
                    "artifact name '{}' is reserved",
                    MANIFEST_FILE
                )));
            }
        }

        let slug_dir = self.inner.root.join(stage).join(config_slug);
        std::fs::create_dir_all(&slug_dir)?;

        let token = Uuid::new_v4();
        let staging = slug_dir.join(format!("{}{}-{}", STAGING_PREFIX, item_key, token));
        std::fs::create_dir(&staging)?;

        let written = assemble(&staging, artifacts, metadata)
            .and_then(|manifest| swap_in(&slug_dir, item_key, &staging, token).map(|_| manifest));

        let manifest = match written {
            Ok(manifest) => manifest,
            Err(e) => {
                if staging.exists() {
                    if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                        warn!(
                            path = %staging.display(),
                            error = %cleanup,
                            "Failed to remove staging directory"
                        );
                    }
                }
                return Err(e);
            }
        };

        let record = IndexRecord {
            stage: stage.to_string(),
            config_slug: config_slug.to_string(),
            item_key: item_key.to_string(),
            artifacts: manifest.artifacts.keys().cloned().collect(),
            updated: manifest.saved_at,
        };

        let mut index = self.lock_index()?;
        index
            .entries
            .insert(index_key(stage, config_slug, item_key), record);
        index.save(&self.inner.root)?;

        debug!(stage, config_slug, item_key, "Cached entry");
        Ok(())
    }

    /// Read and verify an entry
    pub fn get(&self, stage: &str, config_slug: &str, item_key: &str) -> Result<CacheLookup> {
        validate_key(stage, config_slug, item_key)?;
        let dir = self.entry_dir(stage, config_slug, item_key);
        if !dir.is_dir() {
            return Ok(CacheLookup::Absent);
        }

        match read_verified(&dir) {
            Ok((manifest, artifacts)) => Ok(CacheLookup::Present(CacheEntry {
                stage: stage.to_string(),
                config_slug: config_slug.to_string(),
                item_key: item_key.to_string(),
                artifacts,
                metadata: manifest.metadata,
                saved_at: manifest.saved_at,
            })),
            Err(reason) => {
                warn!(
                    stage,
                    config_slug,
                    item_key,
                    reason = %reason,
                    "Cache entry unusable, treating as miss"
                );
                Ok(CacheLookup::Absent)
            }
        }
    }

    /// True if the entry exists and lists every artifact in `required`.
    /// Digests are not checked here; [`get`](Self::get) verifies them.
    pub fn exists(
        &self,
        stage: &str,
        config_slug: &str,
        item_key: &str,
        required: &[&str],
    ) -> Result<bool> {
        validate_key(stage, config_slug, item_key)?;
        let dir = self.entry_dir(stage, config_slug, item_key);
        if !dir.is_dir() {
            return Ok(false);
        }

        let manifest = match Manifest::read(&dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(stage, config_slug, item_key, error = %e, "No usable manifest");
                return Ok(false);
            }
        };

        Ok(required
            .iter()
            .all(|name| manifest.artifacts.contains_key(*name) && dir.join(name).is_file()))
    }

    pub fn list_stages(&self) -> Result<Vec<String>> {
        let index = self.lock_index()?;
        let stages: BTreeSet<&str> = index.entries.values().map(|r| r.stage.as_str()).collect();
        Ok(stages.into_iter().map(String::from).collect())
    }

    pub fn list_config_slugs(&self, stage: &str) -> Result<Vec<String>> {
        let index = self.lock_index()?;
        let slugs: BTreeSet<&str> = index
            .entries
            .values()
            .filter(|r| r.stage == stage)
            .map(|r| r.config_slug.as_str())
            .collect();
        Ok(slugs.into_iter().map(String::from).collect())
    }

    pub fn list_items(&self, stage: &str, config_slug: &str) -> Result<Vec<String>> {
        let index = self.lock_index()?;
        let items: BTreeSet<&str> = index
            .entries
            .values()
            .filter(|r| r.stage == stage && r.config_slug == config_slug)
            .map(|r| r.item_key.as_str())
            .collect();
        Ok(items.into_iter().map(String::from).collect())
    }

    /// Remove every entry under `stage/config_slug`. Returns the number of
    /// index records removed.
    pub fn clear(&self, stage: &str, config_slug: &str) -> Result<usize> {
        validate_component("stage", stage)?;
        validate_component("config slug", config_slug)?;

        let mut index = self.lock_index()?;

        let dir = self.inner.root.join(stage).join(config_slug);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }

        let before = index.entries.len();
        index
            .entries
            .retain(|_, r| !(r.stage == stage && r.config_slug == config_slug));
        let removed = before - index.entries.len();
        index.save(&self.inner.root)?;

        info!(stage, config_slug, removed, "Cleared cache entries");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        {
            let index = self.lock_index()?;
            stats.total_entries = index.entries.len();
            for record in index.entries.values() {
                *stats.per_stage.entry(record.stage.clone()).or_default() += 1;
                *stats
                    .per_config
                    .entry(format!("{}/{}", record.stage, record.config_slug))
                    .or_default() += 1;
            }
        }
        stats.total_bytes = dir_size(&self.inner.root)?;
        Ok(stats)
    }
}

/// Write every artifact and the manifest into the staging directory
fn assemble(
    staging: &Path,
    artifacts: &Artifacts,
    metadata: serde_json::Value,
) -> Result<Manifest> {
    let mut digests = BTreeMap::new();
    for (name, bytes) in artifacts {
        write_synced(&staging.join(name), bytes)?;
        digests.insert(
            name.clone(),
            ArtifactDigest {
                sha256: sha256_hex(bytes),
                size: bytes.len() as u64,
            },
        );
    }

    let manifest = Manifest {
        metadata,
        artifacts: digests,
        saved_at: Utc::now(),
    };
    manifest.write(staging)?;
    sync_dir(staging)?;
    Ok(manifest)
}

/// Move the staged entry into place, retiring the previous one
fn swap_in(slug_dir: &Path, item_key: &str, staging: &Path, token: Uuid) -> Result<()> {
    let target = slug_dir.join(item_key);

    let retired = if target.exists() {
        let retired = slug_dir.join(format!("{}{}-{}", RETIRED_PREFIX, item_key, token));
        std::fs::rename(&target, &retired)?;
        Some(retired)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staging, &target) {
        if let Some(retired) = &retired {
            if let Err(restore) = std::fs::rename(retired, &target) {
                warn!(
                    path = %retired.display(),
                    error = %restore,
                    "Failed to restore retired cache entry"
                );
            }
        }
        return Err(e.into());
    }
    sync_dir(slug_dir)?;

    if let Some(retired) = retired {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            warn!(
                path = %retired.display(),
                error = %e,
                "Failed to remove retired cache entry; it will be swept on next open"
            );
        }
    }
    Ok(())
}

/// Load the manifest and every artifact, checking digests
fn read_verified(dir: &Path) -> std::result::Result<(Manifest, Artifacts), String> {
    let manifest = Manifest::read(dir).map_err(|e| format!("manifest unreadable: {}", e))?;

    let mut artifacts = Artifacts::new();
    for (name, digest) in &manifest.artifacts {
        let bytes = std::fs::read(dir.join(name))
            .map_err(|e| format!("artifact '{}' unreadable: {}", name, e))?;
        if sha256_hex(&bytes) != digest.sha256 {
            return Err(format!("digest mismatch for artifact '{}'", name));
        }
        artifacts.insert(name.clone(), bytes);
    }
    Ok((manifest, artifacts))
}

/// Item key encoded in a retired directory name, `.retired-<item>-<uuid>`
fn retired_item_key(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(RETIRED_PREFIX)?;
    // 36-character uuid plus its leading '-'
    let split = rest.len().checked_sub(37)?;
    if split == 0 || !rest.is_char_boundary(split) || rest.as_bytes()[split] != b'-' {
        return None;
    }
    Uuid::parse_str(&rest[split + 1..]).ok()?;
    Some(&rest[..split])
}

/// Visible and hidden subdirectories of `dir` as (name, path), sorted by name
fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut out = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            out.push((
                entry.file_name().to_string_lossy().into_owned(),
                entry.into_path(),
            ));
        }
    }
    Ok(out)
}

fn recover_interrupted_writes(root: &Path) -> Result<()> {
    let stale_index_tmp = root.join(format!(".{}.tmp", INDEX_FILE));
    if stale_index_tmp.exists() {
        std::fs::remove_file(&stale_index_tmp)?;
    }

    for (stage, stage_dir) in subdirs(root)? {
        if stage.starts_with('.') {
            continue;
        }
        for (slug, slug_dir) in subdirs(&stage_dir)? {
            if slug.starts_with('.') {
                continue;
            }
            for (name, path) in subdirs(&slug_dir)? {
                if name.starts_with(STAGING_PREFIX) {
                    std::fs::remove_dir_all(&path)?;
                    info!(path = %path.display(), "Removed abandoned staging directory");
                } else if let Some(item_key) = retired_item_key(&name) {
                    let target = slug_dir.join(item_key);
                    if target.exists() {
                        std::fs::remove_dir_all(&path)?;
                        debug!(path = %path.display(), "Removed retired cache entry");
                    } else {
                        std::fs::rename(&path, &target)?;
                        warn!(
                            stage = %stage,
                            config_slug = %slug,
                            item_key,
                            "Restored cache entry from interrupted replacement"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Rebuild the index from the manifests on disk
fn scan_entries(root: &Path) -> Result<CacheIndex> {
    let mut index = CacheIndex::default();
    for (stage, stage_dir) in subdirs(root)? {
        if stage.starts_with('.') {
            continue;
        }
        for (slug, slug_dir) in subdirs(&stage_dir)? {
            if slug.starts_with('.') {
                continue;
            }
            for (item, item_dir) in subdirs(&slug_dir)? {
                if item.starts_with('.') {
                    continue;
                }
                match Manifest::read(&item_dir) {
                    Ok(manifest) => {
                        index.entries.insert(
                            index_key(&stage, &slug, &item),
                            IndexRecord {
                                stage: stage.clone(),
                                config_slug: slug.clone(),
                                item_key: item.clone(),
                                artifacts: manifest.artifacts.keys().cloned().collect(),
                                updated: manifest.saved_at,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(path = %item_dir.display(), error = %e, "Skipping entry without manifest");
                    }
                }
            }
        }
    }
    Ok(index)
}

/// Bytes of every regular file under `root`; symlinks are not followed
fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_artifacts() -> Artifacts {
        let mut artifacts = Artifacts::new();
        artifacts.insert("notes".to_string(), b"[1,2,3]".to_vec());
        artifacts.insert("durations".to_string(), b"[0.5,0.5,1.0]".to_vec());
        artifacts
    }

    #[test]
    fn test_retired_item_key_parsing() {
        let token = Uuid::new_v4();
        let name = format!(".retired-Josquin-Ave-1.mei-{}", token);
        assert_eq!(retired_item_key(&name), Some("Josquin-Ave-1.mei"));
        assert_eq!(retired_item_key(".retired-short"), None);
        assert_eq!(retired_item_key(".staging-x-123"), None);
    }

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = StagedCache::open(dir.path()).unwrap();

        cache
            .put(
                "notes",
                "cT_kq_n3_eF",
                "piece_1",
                &sample_artifacts(),
                serde_json::json!({"voices": 4}),
            )
            .unwrap();

        let entry = cache
            .get("notes", "cT_kq_n3_eF", "piece_1")
            .unwrap()
            .into_entry()
            .expect("entry should be present");
        assert_eq!(entry.artifact("notes"), Some(&b"[1,2,3]"[..]));
        assert_eq!(entry.metadata["voices"], 4);
    }

    #[test]
    fn test_replacing_entry_leaves_no_retired_dirs() {
        let dir = TempDir::new().unwrap();
        let cache = StagedCache::open(dir.path()).unwrap();

        for round in 0..3 {
            cache
                .put(
                    "notes",
                    "cT_kq_n3_eF",
                    "piece_1",
                    &sample_artifacts(),
                    serde_json::json!({ "round": round }),
                )
                .unwrap();
        }

        let names: Vec<String> = subdirs(&dir.path().join("notes").join("cT_kq_n3_eF"))
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["piece_1".to_string()]);

        let entry = cache
            .get("notes", "cT_kq_n3_eF", "piece_1")
            .unwrap()
            .into_entry()
            .unwrap();
        assert_eq!(entry.metadata["round"], 2);
    }

    #[test]
    fn test_walk_helpers_cover_nested_and_hidden_dirs() {
        let dir = TempDir::new().unwrap();
        let slug = dir.path().join("notes").join("cT_kq_n3_eF");
        std::fs::create_dir_all(slug.join("piece_2")).unwrap();
        std::fs::create_dir_all(slug.join(".staging-piece_1-x")).unwrap();
        std::fs::create_dir_all(slug.join("piece_1")).unwrap();
        std::fs::write(slug.join("piece_1").join("notes"), [0u8; 7]).unwrap();
        std::fs::write(slug.join(".staging-piece_1-x").join("notes"), [0u8; 5]).unwrap();
        std::fs::write(slug.join("stray.txt"), [0u8; 3]).unwrap();

        let names: Vec<String> = subdirs(&slug).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![".staging-piece_1-x", "piece_1", "piece_2"]);
        assert!(subdirs(&slug.join("missing")).unwrap().is_empty());

        assert_eq!(dir_size(dir.path()).unwrap(), 15);
    }

    #[test]
    fn test_reserved_artifact_name_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = StagedCache::open(dir.path()).unwrap();
        let mut artifacts = Artifacts::new();
        artifacts.insert(MANIFEST_FILE.to_string(), b"{}".to_vec());

        let result = cache.put("notes", "cT_kq_n3_eF", "piece_1", &artifacts, serde_json::Value::Null);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
