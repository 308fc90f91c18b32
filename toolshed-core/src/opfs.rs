//! Private-filesystem backend
//!
//! The native counterpart of the browser's origin-private file system. Keys
//! are split on `:` into a directory hierarchy under a private root:
//!
//! ```text
//! notes:abc        -> <root>/notes/abc.json
//! audio:files:f1   -> <root>/audio/files/f1.bin
//! ```
//!
//! Each segment is percent-escaped, so any key round-trips through `list`.
//! Payloads are binary-safe and can be exposed as object URLs.

use crate::blob::BlobRegistry;
use crate::storage::{key_matches, Result, StorageAdapter, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry name of the filesystem backend
pub const OPFS: &str = "opfs";

const JSON_EXT: &str = "json";
const BIN_EXT: &str = "bin";
const PROBE_FILE: &str = ".probe";

/// Escape one key segment into a portable file name
fn encode_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_segment(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Private-filesystem adapter
pub struct FileSystemAdapter {
    root: PathBuf,
    quota_bytes: u64,
    enabled: bool,
    blobs: Arc<BlobRegistry>,
}

impl FileSystemAdapter {
    /// Create an adapter rooted at `root`. Nothing touches the disk until
    /// the first probe or write.
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
            enabled: true,
            blobs: Arc::new(BlobRegistry::new()),
        }
    }

    /// Force the capability probe to fail
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object-URL registry shared by this adapter
    pub fn blobs(&self) -> Arc<BlobRegistry> {
        self.blobs.clone()
    }

    fn entry_path(&self, key: &str, ext: &str) -> PathBuf {
        let mut segments: Vec<&str> = key.split(':').collect();
        let last = segments.pop().unwrap_or_default();
        let mut path = self.root.clone();
        for dir in &segments {
            path.push(encode_segment(dir));
        }
        path.push(format!("{}.{}", encode_segment(last), ext));
        path
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        let components: Vec<_> = rel.components().collect();
        let (last, dirs) = components.split_last()?;
        for dir in dirs {
            segments.push(decode_segment(dir.as_os_str().to_str()?)?);
        }
        let file_name = last.as_os_str().to_str()?;
        let (stem, ext) = file_name.rsplit_once('.')?;
        if ext != JSON_EXT && ext != BIN_EXT {
            return None;
        }
        segments.push(decode_segment(stem)?);
        Some(segments.join(":"))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every entry file below the root, with its size
    async fn walk(&self) -> std::io::Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(files);
        }
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let len = entry.metadata().await?.len();
                    files.push((entry.path(), len));
                }
            }
        }
        Ok(files)
    }

    /// Load the payload under `key` and pin it behind an object URL
    pub async fn create_object_url(&self, key: &str) -> Result<String> {
        let data = self
            .get_bytes(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(self.blobs.create_url(data).await)
    }

    /// Release an object URL created by this adapter
    pub async fn revoke_object_url(&self, url: &str) -> bool {
        self.blobs.revoke(url).await
    }
}

#[async_trait]
impl StorageAdapter for FileSystemAdapter {
    fn name(&self) -> &'static str {
        OPFS
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key, JSON_EXT);
        match Self::read_optional(&path).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Malformed JSON in {:?}: {}", path, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.write_atomic(&self.entry_path(key, JSON_EXT), &data).await?;
        Self::remove_if_present(&self.entry_path(key, BIN_EXT)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::remove_if_present(&self.entry_path(key, JSON_EXT)).await?;
        Self::remove_if_present(&self.entry_path(key, BIN_EXT)).await
    }

    async fn list(&self, prefix: Option<&str>) -> Vec<String> {
        match self.walk().await {
            Ok(files) => files
                .iter()
                .filter_map(|(path, _)| self.key_for(path))
                .filter(|key| key_matches(key, prefix))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list {:?}: {}", self.root, e);
                Vec::new()
            }
        }
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        for key in self.list(prefix).await {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        for ext in [JSON_EXT, BIN_EXT] {
            if tokio::fs::try_exists(self.entry_path(key, ext))
                .await
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    async fn size(&self) -> u64 {
        match self.walk().await {
            Ok(files) => files.iter().map(|(_, len)| len).sum(),
            Err(e) => {
                tracing::warn!("Failed to measure {:?}: {}", self.root, e);
                0
            }
        }
    }

    async fn available_space(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.size().await)
    }

    async fn is_supported(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let probe = self.root.join(PROBE_FILE);
        let result: std::io::Result<()> = async {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::write(&probe, b"ok").await?;
            tokio::fs::remove_file(&probe).await
        }
        .await;
        if let Err(e) = &result {
            tracing::debug!("Filesystem probe failed at {:?}: {}", self.root, e);
        }
        result.is_ok()
    }

    fn binary_safe(&self) -> bool {
        true
    }

    async fn get_bytes(&self, key: &str) -> Option<Bytes> {
        for ext in [BIN_EXT, JSON_EXT] {
            let path = self.entry_path(key, ext);
            match Self::read_optional(&path).await {
                Ok(Some(data)) => return Some(Bytes::from(data)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to read {:?}: {}", path, e);
                    return None;
                }
            }
        }
        None
    }

    async fn set_bytes(&self, key: &str, data: Bytes) -> Result<()> {
        self.write_atomic(&self.entry_path(key, BIN_EXT), &data).await?;
        Self::remove_if_present(&self.entry_path(key, JSON_EXT)).await
    }
}
