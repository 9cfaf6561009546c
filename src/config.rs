//! Store configuration, read from `config.json`

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory holding `<owner>/<project>` trees
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    /// Per-project quota in bytes, 0 disables the check
    #[serde(default)]
    pub max_project_size: i64,
    /// Hidden per-project directory for metadata and index snapshots
    #[serde(default = "default_control_dir")]
    pub control_dir: String,
    #[serde(default)]
    pub index: IndexCacheConfig,
    #[serde(default)]
    pub checksum: ChecksumConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("projects")
}

fn default_control_dir() -> String {
    ".gisquick".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            max_project_size: 0,
            control_dir: default_control_dir(),
            index: IndexCacheConfig::default(),
            checksum: ChecksumConfig::default(),
            scan: ScanConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Loads the config file; a missing file gives defaults, a broken one is
    /// logged and also gives defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<StoreConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("invalid config {:?}, using defaults: {}", path, e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("cannot read config {:?}, using defaults: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    pub fn with_projects_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.projects_root = root.into();
        self
    }
}

/// Index cache lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCacheConfig {
    /// Lifetime of a cached index, counted from load (not refreshed on access)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How often expired entries are collected
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    12 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for IndexCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl IndexCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// External integrity tool used for package formats
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumConfig {
    #[serde(default = "default_tool")]
    pub tool: PathBuf,
    /// Extensions (without dot) routed to `tool`
    #[serde(default = "default_tool_extensions")]
    pub extensions: Vec<String>,
}

fn default_tool() -> PathBuf {
    PathBuf::from("dbhash")
}

fn default_tool_extensions() -> Vec<String> {
    vec!["gpkg".to_string()]
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            extensions: default_tool_extensions(),
        }
    }
}

/// Scanner exclusion rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Editor backup files end with this suffix
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
    /// Companion files of open databases, matched case-insensitively
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,
}

fn default_backup_suffix() -> String {
    "~".to_string()
}

fn default_excluded_extensions() -> Vec<String> {
    vec!["gpkg-wal".to_string(), "gpkg-shm".to_string()]
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            backup_suffix: default_backup_suffix(),
            excluded_extensions: default_excluded_extensions(),
        }
    }
}
