//! Local-storage backend
//!
//! A quota-bounded string map holding serialized JSON text, the native
//! counterpart of the browser's synchronous `localStorage`. It can be kept
//! purely in memory or mirrored to a single JSON file that is rewritten
//! atomically after each mutation. Not binary-safe.

use crate::storage::{key_matches, Result, StorageAdapter, StorageError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Registry name of the local-storage backend
pub const LOCAL_STORAGE: &str = "localStorage";

/// Local-storage adapter
pub struct LocalStorageAdapter {
    entries: RwLock<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    quota_bytes: u64,
}

/// Bytes a browser charges for one entry (UTF-16 code units)
fn entry_cost(key: &str, value: &str) -> u64 {
    ((key.encode_utf16().count() + value.encode_utf16().count()) * 2) as u64
}

fn usage(entries: &BTreeMap<String, String>) -> u64 {
    entries.iter().map(|(k, v)| entry_cost(k, v)).sum()
}

impl LocalStorageAdapter {
    /// In-memory adapter
    pub fn in_memory(quota_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            path: None,
            quota_bytes,
        }
    }

    /// Open a file-backed adapter, loading existing entries from `path`
    pub async fn open(path: &Path, quota_bytes: u64) -> Result<Self> {
        let entries = if tokio::fs::try_exists(path).await? {
            let data = tokio::fs::read_to_string(path).await?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&data)?;
            tracing::debug!("Loaded {} local-storage entries from {:?}", entries.len(), path);
            entries
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path.to_path_buf()),
            quota_bytes,
        })
    }

    /// Configured quota in bytes
    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Raw serialized text stored under `key`
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store raw text under `key` without JSON validation
    pub async fn set_raw(&self, key: &str, text: String) -> Result<()> {
        let mut entries = self.entries.write().await;
        let current = usage(&entries);
        let replaced = entries.get(key).map_or(0, |old| entry_cost(key, old));
        let needed = current - replaced + entry_cost(key, &text);
        if needed > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }
        entries.insert(key.to_string(), text);
        self.flush(&entries).await
    }

    async fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string(entries)?;
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    fn name(&self) -> &'static str {
        LOCAL_STORAGE
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let text = self.get_raw(key).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Malformed JSON under local-storage key {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.set_raw(key, text).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Vec<String> {
        self.entries
            .read()
            .await
            .keys()
            .filter(|k| key_matches(k, prefix))
            .cloned()
            .collect()
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !key_matches(k, prefix));
        if entries.len() != before {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn size(&self) -> u64 {
        usage(&*self.entries.read().await)
    }

    // The browser API offers no way to query remaining localStorage space.
    async fn available_space(&self) -> u64 {
        0
    }
}
