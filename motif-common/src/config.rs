//! Configuration loading and root folder resolution

use crate::{Error, Result, Tolerance};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_ENV_VAR: &str = "MOTIF_ROOT";

/// Default number of rows committed per reconciler batch
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Default number of piece pairs committed per miner batch
pub const DEFAULT_BATCH_PAIRS: usize = 50;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotifConfig {
    /// Root folder holding the database and the cache tree
    pub root_folder: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub reconcile: ReconcileConfig,
    pub miner: MinerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; relative paths resolve against the root folder
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache tree; relative paths resolve against the root folder
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub tolerance: Tolerance,
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::DEFAULT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MinerConfig {
    pub batch_pairs: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            batch_pairs: DEFAULT_BATCH_PAIRS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MotifConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MotifConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are returned and a warning is
    /// logged. A file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config location if one exists, else defaults
    pub fn load_default() -> Result<Self> {
        match default_config_file() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Write configuration as TOML
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.reconcile.batch_size == 0 {
            return Err(Error::Config("reconcile.batch_size must be at least 1".into()));
        }
        if self.miner.batch_pairs == 0 {
            return Err(Error::Config("miner.batch_pairs must be at least 1".into()));
        }
        Ok(())
    }

    /// Database file location under the given root folder
    pub fn database_path(&self, root: &Path) -> PathBuf {
        match &self.database.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.join("motif.db"),
        }
    }

    /// Cache tree location under the given root folder
    pub fn cache_root(&self, root: &Path) -> PathBuf {
        match &self.cache.root {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.join("cache"),
        }
    }
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &MotifConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root) = &config.root_folder {
        return root.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Platform config file location (`~/.config/motif/config.toml` on Linux)
pub fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("motif").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/motif/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("motif"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/motif"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("motif"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/motif"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("motif"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\motif"))
    } else {
        PathBuf::from("./motif_data")
    }
}
