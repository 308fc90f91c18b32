//! Storage abstraction layer for Toolshed
//!
//! Every persistence backend implements [`StorageAdapter`]. Read-side
//! operations are soft: a backend failure is logged and turned into an
//! empty/absent value. Write-side operations return errors.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Quota exceeded: need {needed} bytes, quota is {quota} bytes")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Uniform key/value persistence contract
///
/// Keys are plain strings. Entity stores namespace them as `prefix:id`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short registry name of the backend
    fn name(&self) -> &'static str;

    /// Get the value stored under `key`, `None` when absent or unreadable
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a JSON value under `key`
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys, optionally restricted to those starting with `prefix`.
    /// Ordering is backend-dependent.
    async fn list(&self, prefix: Option<&str>) -> Vec<String>;

    /// Remove every key, or only those starting with `prefix`
    async fn clear(&self, prefix: Option<&str>) -> Result<()>;

    /// Check whether `key` is present
    async fn exists(&self, key: &str) -> bool;

    /// Bytes currently used by this backend
    async fn size(&self) -> u64;

    /// Bytes still available, `0` when the backend cannot tell
    async fn available_space(&self) -> u64 {
        0
    }

    /// Capability probe for the current environment
    async fn is_supported(&self) -> bool {
        true
    }

    /// Whether raw binary payloads survive a round trip
    fn binary_safe(&self) -> bool {
        false
    }

    /// Get a binary payload
    async fn get_bytes(&self, _key: &str) -> Option<Bytes> {
        None
    }

    /// Store a binary payload
    async fn set_bytes(&self, _key: &str, _data: Bytes) -> Result<()> {
        Err(StorageError::NotSupported(format!(
            "{} does not store binary payloads",
            self.name()
        )))
    }
}

/// Returns true when `key` falls under `prefix` (or there is no prefix)
pub(crate) fn key_matches(key: &str, prefix: Option<&str>) -> bool {
    prefix.map_or(true, |p| key.starts_with(p))
}
