//! Adapter registry and capability-based backend selection
//!
//! A [`StorageFactory`] is built explicitly and handed to whoever constructs
//! stores; there is no process-wide registry. Backend choice is an ordered
//! candidate list probed once per store construction. The outcome of every
//! probe is kept in the returned [`AdapterSelection`], so a caller can see why
//! a backend was or wasn't picked. Losing support later on is not detected.

use crate::chat::ChatStore;
use crate::config::StorageConfig;
use crate::geo::GeoProfileStore;
use crate::indexeddb::{DatabaseAdapter, INDEXED_DB};
use crate::local_storage::{LocalStorageAdapter, LOCAL_STORAGE};
use crate::notes::NoteStore;
use crate::opfs::{FileSystemAdapter, OPFS};
use crate::sound_library::SoundLibrary;
use crate::storage::{Result, StorageAdapter, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Candidates for large or binary payloads (notes, chats, audio)
pub const LARGE_PAYLOAD_CHAIN: &[&str] = &[OPFS, INDEXED_DB, LOCAL_STORAGE];

/// Candidates for small records
pub const SMALL_RECORD_CHAIN: &[&str] = &[LOCAL_STORAGE];

/// Result of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "adapter", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Supported(String),
    Unsupported(String),
    NotRegistered(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Supported(name) => write!(f, "{}: supported", name),
            ProbeOutcome::Unsupported(name) => write!(f, "{}: unsupported", name),
            ProbeOutcome::NotRegistered(name) => write!(f, "{}: not registered", name),
        }
    }
}

/// The adapter picked for a store, plus how it was picked
#[derive(Clone)]
pub struct AdapterSelection {
    pub name: String,
    pub adapter: Arc<dyn StorageAdapter>,
    pub probes: Vec<ProbeOutcome>,
}

impl fmt::Debug for AdapterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSelection")
            .field("name", &self.name)
            .field("probes", &self.probes)
            .finish()
    }
}

/// Registry of named adapters
#[derive(Default, Clone)]
pub struct StorageFactory {
    adapters: BTreeMap<String, Arc<dyn StorageAdapter>>,
    filesystem: Option<Arc<FileSystemAdapter>>,
}

impl StorageFactory {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local-storage, filesystem and database adapters
    /// built from `config`
    ///
    /// A disabled or unopenable database is left unregistered; a disabled
    /// filesystem is registered but fails its probe.
    pub async fn with_defaults(config: &StorageConfig) -> Result<Self> {
        let mut factory = Self::new();

        let local = match config.local_storage_path() {
            Some(path) => LocalStorageAdapter::open(&path, config.local_quota_bytes).await?,
            None => LocalStorageAdapter::in_memory(config.local_quota_bytes),
        };
        factory.register(LOCAL_STORAGE, Arc::new(local));

        let mut fs = FileSystemAdapter::new(config.fs_root(), config.fs_quota_bytes);
        if !config.fs_enabled {
            fs = fs.disabled();
        }
        factory.register_filesystem(Arc::new(fs));

        if config.db_enabled {
            match DatabaseAdapter::open(&config.db_path(), config.db_quota_bytes) {
                Ok(db) => factory.register(INDEXED_DB, Arc::new(db)),
                Err(e) => tracing::warn!("Database backend unavailable: {}", e),
            }
        }

        tracing::info!(
            "Storage factory ready with adapters: {}",
            factory.adapter_names().join(", ")
        );
        Ok(factory)
    }

    /// Register (or replace) an adapter under `name`
    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn StorageAdapter>) {
        let name = name.into();
        tracing::debug!("Registering storage adapter {}", name);
        self.adapters.insert(name, adapter);
    }

    /// Register the filesystem adapter, keeping its concrete type around for
    /// object-URL access
    pub fn register_filesystem(&mut self, adapter: Arc<FileSystemAdapter>) {
        self.register(OPFS, adapter.clone());
        self.filesystem = Some(adapter);
    }

    /// Look up an adapter by name
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn StorageAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// The filesystem adapter, if registered through
    /// [`register_filesystem`](Self::register_filesystem)
    pub fn filesystem(&self) -> Option<Arc<FileSystemAdapter>> {
        self.filesystem.clone()
    }

    /// Registered adapter names
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Probe `candidates` in order and pick the first supported one
    pub async fn select(&self, candidates: &[&str]) -> Result<AdapterSelection> {
        let mut probes = Vec::with_capacity(candidates.len());
        for &name in candidates {
            let Some(adapter) = self.adapter(name) else {
                probes.push(ProbeOutcome::NotRegistered(name.to_string()));
                continue;
            };
            if adapter.is_supported().await {
                probes.push(ProbeOutcome::Supported(name.to_string()));
                tracing::info!("Selected storage adapter {}", name);
                return Ok(AdapterSelection {
                    name: name.to_string(),
                    adapter,
                    probes,
                });
            }
            probes.push(ProbeOutcome::Unsupported(name.to_string()));
        }
        let tried: Vec<String> = probes.iter().map(ToString::to_string).collect();
        Err(StorageError::NotSupported(format!(
            "no usable storage adapter ({})",
            tried.join(", ")
        )))
    }

    /// Explicit adapter if named, otherwise the first supported candidate
    pub async fn resolve(&self, adapter_name: Option<&str>, chain: &[&str]) -> Result<AdapterSelection> {
        match adapter_name {
            Some(name) => {
                let adapter = self.adapter(name).ok_or_else(|| {
                    StorageError::NotSupported(format!("unknown storage adapter '{}'", name))
                })?;
                Ok(AdapterSelection {
                    name: name.to_string(),
                    adapter,
                    probes: Vec::new(),
                })
            }
            None => self.select(chain).await,
        }
    }

    /// Notes store
    pub async fn create_notes_storage(&self, adapter_name: Option<&str>) -> Result<NoteStore> {
        let selection = self.resolve(adapter_name, LARGE_PAYLOAD_CHAIN).await?;
        Ok(NoteStore::new(selection.adapter))
    }

    /// Chat session store
    pub async fn create_chat_storage(&self, adapter_name: Option<&str>) -> Result<ChatStore> {
        let selection = self.resolve(adapter_name, LARGE_PAYLOAD_CHAIN).await?;
        Ok(ChatStore::new(selection.adapter))
    }

    /// Geolocation profile store
    pub async fn create_geo_profile_storage(&self, adapter_name: Option<&str>) -> Result<GeoProfileStore> {
        let selection = self.resolve(adapter_name, SMALL_RECORD_CHAIN).await?;
        Ok(GeoProfileStore::new(selection.adapter))
    }

    /// Sound library: payloads on the selected binary-safe adapter, metadata
    /// mirrored to local storage
    pub async fn create_sound_library(&self, adapter_name: Option<&str>) -> Result<SoundLibrary> {
        let primary = self.resolve(adapter_name, LARGE_PAYLOAD_CHAIN).await?;
        let mirror = self.adapter(LOCAL_STORAGE).unwrap_or_else(|| primary.adapter.clone());

        // Second binary-safe adapter to retry payload writes on
        let mut fallback = None;
        for &name in LARGE_PAYLOAD_CHAIN {
            if name == primary.name {
                continue;
            }
            if let Some(adapter) = self.adapter(name) {
                if adapter.binary_safe() && adapter.is_supported().await {
                    fallback = Some(adapter);
                    break;
                }
            }
        }

        let blobs = self.filesystem.as_ref().map(|fs| fs.blobs()).unwrap_or_default();
        SoundLibrary::open(primary.adapter, fallback, mirror, blobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_prefer_filesystem() {
        let dir = TempDir::new().unwrap();
        let factory = StorageFactory::with_defaults(&StorageConfig::with_root(dir.path()))
            .await
            .unwrap();
        assert_eq!(factory.adapter_names(), vec!["indexedDB", "localStorage", "opfs"]);

        let selection = factory.select(LARGE_PAYLOAD_CHAIN).await.unwrap();
        assert_eq!(selection.name, "opfs");
        assert_eq!(selection.probes, vec![ProbeOutcome::Supported("opfs".to_string())]);
    }

    #[tokio::test]
    async fn test_fallback_to_database() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::with_root(dir.path());
        config.fs_enabled = false;
        let factory = StorageFactory::with_defaults(&config).await.unwrap();

        let selection = factory.select(LARGE_PAYLOAD_CHAIN).await.unwrap();
        assert_eq!(selection.name, "indexedDB");
        assert_eq!(
            selection.probes,
            vec![
                ProbeOutcome::Unsupported("opfs".to_string()),
                ProbeOutcome::Supported("indexedDB".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_to_local_storage() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::with_root(dir.path());
        config.fs_enabled = false;
        config.db_enabled = false;
        let factory = StorageFactory::with_defaults(&config).await.unwrap();

        let selection = factory.select(LARGE_PAYLOAD_CHAIN).await.unwrap();
        assert_eq!(selection.name, "localStorage");
        assert_eq!(
            selection.probes,
            vec![
                ProbeOutcome::Unsupported("opfs".to_string()),
                ProbeOutcome::NotRegistered("indexedDB".to_string()),
                ProbeOutcome::Supported("localStorage".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_candidate() {
        let factory = StorageFactory::new();
        let err = factory.select(LARGE_PAYLOAD_CHAIN).await.unwrap_err();
        assert!(matches!(err, StorageError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_explicit_adapter_name() {
        let mut factory = StorageFactory::new();
        factory.register(LOCAL_STORAGE, Arc::new(LocalStorageAdapter::in_memory(1024)));

        let selection = factory.resolve(Some("localStorage"), LARGE_PAYLOAD_CHAIN).await.unwrap();
        assert_eq!(selection.name, "localStorage");
        assert!(selection.probes.is_empty());

        let err = factory.resolve(Some("webSQL"), LARGE_PAYLOAD_CHAIN).await.unwrap_err();
        assert!(matches!(err, StorageError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_independent_factories() {
        let mut a = StorageFactory::new();
        let b = StorageFactory::new();
        a.register(LOCAL_STORAGE, Arc::new(LocalStorageAdapter::in_memory(1024)));
        assert!(a.adapter(LOCAL_STORAGE).is_some());
        assert!(b.adapter(LOCAL_STORAGE).is_none());
    }

    #[test]
    fn test_probe_outcome_display() {
        assert_eq!(ProbeOutcome::Unsupported("opfs".into()).to_string(), "opfs: unsupported");
        assert_eq!(
            ProbeOutcome::NotRegistered("indexedDB".into()).to_string(),
            "indexedDB: not registered"
        );
    }
}
