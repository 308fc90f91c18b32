//! Object URLs for loaded binary payloads
//!
//! A loaded payload is pinned in memory under a `blob:` URL until it is
//! revoked. Forgetting to revoke keeps the bytes alive for the lifetime of
//! the registry.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

const URL_SCHEME: &str = "blob:toolshed/";

/// Registry of live object URLs
#[derive(Default)]
pub struct BlobRegistry {
    urls: RwLock<HashMap<String, Bytes>>,
}

impl BlobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `data` and return a fresh URL for it
    pub async fn create_url(&self, data: Bytes) -> String {
        let url = format!("{}{}", URL_SCHEME, uuid::Uuid::new_v4());
        tracing::debug!("Created object URL {} ({} bytes)", url, data.len());
        self.urls.write().await.insert(url.clone(), data);
        url
    }

    /// Bytes behind a live URL
    pub async fn resolve(&self, url: &str) -> Option<Bytes> {
        self.urls.read().await.get(url).cloned()
    }

    /// Release a URL. Returns false if it was not live.
    pub async fn revoke(&self, url: &str) -> bool {
        let removed = self.urls.write().await.remove(url).is_some();
        if removed {
            tracing::debug!("Revoked object URL {}", url);
        }
        removed
    }

    /// Number of live URLs
    pub async fn live_count(&self) -> usize {
        self.urls.read().await.len()
    }

    /// Total bytes pinned by live URLs
    pub async fn pinned_bytes(&self) -> u64 {
        self.urls.read().await.values().map(|b| b.len() as u64).sum()
    }
}

/// Returns true if `url` looks like one of ours
pub fn is_object_url(url: &str) -> bool {
    url.starts_with(URL_SCHEME)
}
