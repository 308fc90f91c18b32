//! Storage configuration
//!
//! Stored as JSON (usually `toolshed.json`). A missing file means defaults.

use crate::storage::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default quota of the local-storage backend (browsers allow ~5 MB)
pub const DEFAULT_LOCAL_QUOTA: u64 = 5 * 1024 * 1024;

/// Default quota of the filesystem and database backends
pub const DEFAULT_LARGE_QUOTA: u64 = 1024 * 1024 * 1024;

/// Configuration for the default adapter set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every backend's data
    pub root_dir: PathBuf,
    /// Keep local storage in memory only (nothing written to disk)
    pub local_in_memory: bool,
    /// Local-storage quota in bytes
    pub local_quota_bytes: u64,
    /// Quota reported for the filesystem backend
    pub fs_quota_bytes: u64,
    /// Quota reported for the database backend
    pub db_quota_bytes: u64,
    /// Disable the filesystem backend (its probe then fails)
    pub fs_enabled: bool,
    /// Disable the database backend (its probe then fails)
    pub db_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data/toolshed"),
            local_in_memory: false,
            local_quota_bytes: DEFAULT_LOCAL_QUOTA,
            fs_quota_bytes: DEFAULT_LARGE_QUOTA,
            db_quota_bytes: DEFAULT_LARGE_QUOTA,
            fs_enabled: true,
            db_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Config rooted at `root_dir`, everything else default
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Backing file of the local-storage backend
    pub fn local_storage_path(&self) -> Option<PathBuf> {
        if self.local_in_memory {
            None
        } else {
            Some(self.root_dir.join("local_storage.json"))
        }
    }

    /// Root directory of the filesystem backend
    pub fn fs_root(&self) -> PathBuf {
        self.root_dir.join("opfs")
    }

    /// SQLite file of the database backend
    pub fn db_path(&self) -> PathBuf {
        self.root_dir.join("indexeddb.sqlite")
    }

    /// Load config from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let config: StorageConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path` atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.local_quota_bytes == 0 {
            return Err(StorageError::InvalidInput(
                "local_quota_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
