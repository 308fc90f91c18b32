//! Sound library
//!
//! A folder tree of audio files. Payloads go to a binary-safe adapter (with
//! one fallback adapter tried when the primary write fails), while the tree
//! itself is mirrored as a single JSON record to a small-record adapter:
//!
//! ```json
//! { "files": [ ...file records without payload ], "folders": [ ... ] }
//! ```
//!
//! The root folder (`"root"`) always exists. Loaded payloads are pinned
//! behind object URLs until [`SoundLibrary::unload`] is called.

use crate::blob::BlobRegistry;
use crate::storage::{Result, StorageAdapter, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key prefix of sound-library records
pub const SOUND_LIBRARY_PREFIX: &str = "soundLibrary";

/// Id of the implicit root folder
pub const ROOT_FOLDER_ID: &str = "root";

const METADATA_KEY: &str = "soundLibrary:metadata";

fn payload_key(file_id: &str) -> String {
    format!("{}:audio:{}", SOUND_LIBRARY_PREFIX, file_id)
}

/// A folder in the library tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Child folder and file ids, in display order
    #[serde(default)]
    pub children: Vec<String>,
    pub created_at: i64,
}

impl Folder {
    fn root() -> Self {
        Self {
            id: ROOT_FOLDER_ID.to_string(),
            name: "Library".to_string(),
            parent_id: None,
            children: Vec::new(),
            created_at: 0,
        }
    }
}

/// Metadata of a stored audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: i64,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Adapter holding the payload
    #[serde(default)]
    pub backend: String,
}

/// Persisted shape of the metadata mirror
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    #[serde(default)]
    pub files: Vec<AudioFile>,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

/// A child of a folder
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryItem {
    Folder(Folder),
    File(AudioFile),
}

#[derive(Default)]
struct LibraryState {
    folders: BTreeMap<String, Folder>,
    files: BTreeMap<String, AudioFile>,
    /// file id -> live object URL
    loaded: HashMap<String, String>,
}

impl LibraryState {
    fn from_metadata(meta: LibraryMetadata) -> Self {
        let mut state = LibraryState::default();
        for folder in meta.folders {
            state.folders.insert(folder.id.clone(), folder);
        }
        for file in meta.files {
            state.files.insert(file.id.clone(), file);
        }
        state
            .folders
            .entry(ROOT_FOLDER_ID.to_string())
            .or_insert_with(Folder::root);
        state
    }

    fn to_metadata(&self) -> LibraryMetadata {
        LibraryMetadata {
            files: self.files.values().cloned().collect(),
            folders: self.folders.values().cloned().collect(),
        }
    }

    fn folder_mut(&mut self, id: &str) -> Result<&mut Folder> {
        self.folders
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("folder {}", id)))
    }

    fn detach(&mut self, parent_id: &str, child_id: &str) {
        if let Some(parent) = self.folders.get_mut(parent_id) {
            parent.children.retain(|c| c != child_id);
        }
    }

    /// `folder_id` and every folder below it, parents first
    fn subtree(&self, folder_id: &str) -> Vec<String> {
        let mut out = vec![folder_id.to_string()];
        let mut i = 0;
        while i < out.len() {
            if let Some(folder) = self.folders.get(&out[i]) {
                for child in &folder.children {
                    if self.folders.contains_key(child) {
                        out.push(child.clone());
                    }
                }
            }
            i += 1;
        }
        out
    }
}

/// Folder tree plus audio payload storage
pub struct SoundLibrary {
    primary: Arc<dyn StorageAdapter>,
    fallback: Option<Arc<dyn StorageAdapter>>,
    mirror: Arc<dyn StorageAdapter>,
    blobs: Arc<BlobRegistry>,
    state: Mutex<LibraryState>,
}

impl SoundLibrary {
    /// Open the library, restoring the tree from the metadata mirror
    pub async fn open(
        primary: Arc<dyn StorageAdapter>,
        fallback: Option<Arc<dyn StorageAdapter>>,
        mirror: Arc<dyn StorageAdapter>,
        blobs: Arc<BlobRegistry>,
    ) -> Result<Self> {
        let meta = match mirror.get(METADATA_KEY).await {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable sound-library metadata: {}", e);
                LibraryMetadata::default()
            }),
            None => LibraryMetadata::default(),
        };
        tracing::debug!(
            "Sound library opened with {} folders and {} files",
            meta.folders.len(),
            meta.files.len()
        );
        Ok(Self {
            primary,
            fallback,
            mirror,
            blobs,
            state: Mutex::new(LibraryState::from_metadata(meta)),
        })
    }

    async fn persist(&self, state: &LibraryState) -> Result<()> {
        let value = serde_json::to_value(state.to_metadata())?;
        self.mirror.set(METADATA_KEY, &value).await
    }

    fn adapter_named(&self, name: &str) -> Arc<dyn StorageAdapter> {
        match &self.fallback {
            Some(fallback) if fallback.name() == name => fallback.clone(),
            _ => self.primary.clone(),
        }
    }

    /// Snapshot of the metadata mirror
    pub async fn metadata(&self) -> LibraryMetadata {
        self.state.lock().await.to_metadata()
    }

    /// Look up a folder by id
    pub async fn folder(&self, id: &str) -> Option<Folder> {
        self.state.lock().await.folders.get(id).cloned()
    }

    /// Look up a file record by id
    pub async fn file(&self, id: &str) -> Option<AudioFile> {
        self.state.lock().await.files.get(id).cloned()
    }

    /// Children of a folder in display order
    pub async fn children(&self, folder_id: &str) -> Result<Vec<LibraryItem>> {
        let state = self.state.lock().await;
        let folder = state
            .folders
            .get(folder_id)
            .ok_or_else(|| StorageError::NotFound(format!("folder {}", folder_id)))?;
        Ok(folder
            .children
            .iter()
            .filter_map(|id| {
                if let Some(f) = state.folders.get(id) {
                    Some(LibraryItem::Folder(f.clone()))
                } else {
                    state.files.get(id).map(|f| LibraryItem::File(f.clone()))
                }
            })
            .collect())
    }

    /// Create a folder under `parent_id` and return its id
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = uuid::Uuid::new_v4().to_string();
        state.folder_mut(parent_id)?.children.push(id.clone());
        state.folders.insert(
            id.clone(),
            Folder {
                id: id.clone(),
                name: name.to_string(),
                parent_id: Some(parent_id.to_string()),
                children: Vec::new(),
                created_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        self.persist(&state).await?;
        Ok(id)
    }

    /// Rename a folder other than the root
    pub async fn rename_folder(&self, id: &str, name: &str) -> Result<()> {
        if id == ROOT_FOLDER_ID {
            return Err(StorageError::InvalidInput("the root folder cannot be renamed".to_string()));
        }
        let mut state = self.state.lock().await;
        state.folder_mut(id)?.name = name.to_string();
        self.persist(&state).await
    }

    /// Delete a folder with everything below it, payloads included
    pub async fn delete_folder(&self, id: &str) -> Result<()> {
        if id == ROOT_FOLDER_ID {
            return Err(StorageError::InvalidInput("the root folder cannot be deleted".to_string()));
        }
        let mut state = self.state.lock().await;
        let parent_id = state
            .folders
            .get(id)
            .ok_or_else(|| StorageError::NotFound(format!("folder {}", id)))?
            .parent_id
            .clone();

        let folders = state.subtree(id);
        let files: Vec<AudioFile> = state
            .files
            .values()
            .filter(|f| folders.contains(&f.parent_id))
            .cloned()
            .collect();

        for file in &files {
            if let Err(e) = self
                .adapter_named(&file.backend)
                .delete(&payload_key(&file.id))
                .await
            {
                // Keep the tree consistent with the payloads already removed
                tracing::warn!("Failed to delete payload of {} while deleting folder {}: {}", file.id, id, e);
                if let Err(persist_err) = self.persist(&state).await {
                    tracing::warn!("Failed to persist partial folder deletion: {}", persist_err);
                }
                return Err(e);
            }
            self.release(&mut state, &file.id).await;
            state.files.remove(&file.id);
            state.detach(&file.parent_id, &file.id);
        }
        for folder_id in &folders {
            state.folders.remove(folder_id);
        }
        if let Some(parent_id) = parent_id {
            state.detach(&parent_id, id);
        }
        tracing::debug!("Deleted folder {} ({} files)", id, files.len());
        self.persist(&state).await
    }

    /// Move a folder or file under another folder
    pub async fn move_item(&self, id: &str, new_parent_id: &str) -> Result<()> {
        if id == ROOT_FOLDER_ID {
            return Err(StorageError::InvalidInput("the root folder cannot be moved".to_string()));
        }
        let mut state = self.state.lock().await;
        if !state.folders.contains_key(new_parent_id) {
            return Err(StorageError::NotFound(format!("folder {}", new_parent_id)));
        }

        let old_parent = if let Some(folder) = state.folders.get(id) {
            if state.subtree(id).iter().any(|f| f == new_parent_id) {
                return Err(StorageError::InvalidInput(
                    "a folder cannot be moved into itself".to_string(),
                ));
            }
            folder.parent_id.clone()
        } else if let Some(file) = state.files.get(id) {
            Some(file.parent_id.clone())
        } else {
            return Err(StorageError::NotFound(format!("item {}", id)));
        };

        if let Some(old_parent) = old_parent {
            state.detach(&old_parent, id);
        }
        state.folder_mut(new_parent_id)?.children.push(id.to_string());
        if let Some(folder) = state.folders.get_mut(id) {
            folder.parent_id = Some(new_parent_id.to_string());
        } else if let Some(file) = state.files.get_mut(id) {
            file.parent_id = new_parent_id.to_string();
        }
        self.persist(&state).await
    }

    async fn write_payload(&self, key: &str, data: Bytes) -> Result<&'static str> {
        match self.primary.set_bytes(key, data.clone()).await {
            Ok(()) => Ok(self.primary.name()),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                tracing::warn!(
                    "Payload write to {} failed ({}), retrying on {}",
                    self.primary.name(),
                    primary_err,
                    fallback.name()
                );
                fallback.set_bytes(key, data).await?;
                Ok(fallback.name())
            }
        }
    }

    /// Store an audio file under `parent_id` and return its id
    pub async fn save_file(&self, name: &str, parent_id: &str, mime_type: &str, data: Bytes) -> Result<String> {
        let mut state = self.state.lock().await;
        if !state.folders.contains_key(parent_id) {
            return Err(StorageError::NotFound(format!("folder {}", parent_id)));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let key = payload_key(&id);
        let size = data.len() as u64;
        let backend = self.write_payload(&key, data).await?;

        state.files.insert(
            id.clone(),
            AudioFile {
                id: id.clone(),
                name: name.to_string(),
                parent_id: parent_id.to_string(),
                mime_type: mime_type.to_string(),
                size,
                created_at: chrono::Utc::now().timestamp_millis(),
                duration_secs: None,
                backend: backend.to_string(),
            },
        );
        state.folder_mut(parent_id)?.children.push(id.clone());

        if let Err(e) = self.persist(&state).await {
            // Without the mirror entry the payload would be unreachable
            state.files.remove(&id);
            state.detach(parent_id, &id);
            if let Err(cleanup) = self.adapter_named(backend).delete(&key).await {
                tracing::warn!("Failed to remove orphaned payload {}: {}", key, cleanup);
            }
            return Err(e);
        }
        tracing::debug!("Saved {} ({} bytes) to {}", name, size, backend);
        Ok(id)
    }

    /// Record a decoded duration for a file
    pub async fn set_duration(&self, id: &str, duration_secs: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        let file = state
            .files
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("file {}", id)))?;
        file.duration_secs = Some(duration_secs);
        self.persist(&state).await
    }

    /// Remove a file record and its payload
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let file = state
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("file {}", id)))?;
        self.release(&mut state, id).await;
        self.adapter_named(&file.backend)
            .delete(&payload_key(id))
            .await?;
        state.files.remove(id);
        state.detach(&file.parent_id, id);
        self.persist(&state).await
    }

    /// Pin a file's payload behind an object URL for playback
    pub async fn load(&self, id: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(url) = state.loaded.get(id) {
            return Ok(url.clone());
        }
        let file = state
            .files
            .get(id)
            .ok_or_else(|| StorageError::NotFound(format!("file {}", id)))?;
        let data = self
            .adapter_named(&file.backend)
            .get_bytes(&payload_key(id))
            .await
            .ok_or_else(|| StorageError::NotFound(payload_key(id)))?;
        let url = self.blobs.create_url(data).await;
        state.loaded.insert(id.to_string(), url.clone());
        Ok(url)
    }

    async fn release(&self, state: &mut LibraryState, id: &str) -> bool {
        match state.loaded.remove(id) {
            Some(url) => self.blobs.revoke(&url).await,
            None => false,
        }
    }

    /// Release a loaded payload. Returns false if it was not loaded.
    pub async fn unload(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        self.release(&mut state, id).await
    }

    /// Release every loaded payload
    pub async fn unload_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let urls: Vec<String> = state.loaded.drain().map(|(_, url)| url).collect();
        for url in &urls {
            self.blobs.revoke(url).await;
        }
        urls.len()
    }

    /// Bytes behind an object URL returned by [`load`](Self::load)
    pub async fn resolve(&self, url: &str) -> Option<Bytes> {
        self.blobs.resolve(url).await
    }
}
