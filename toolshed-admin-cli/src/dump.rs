//! Export and import of adapter contents
//!
//! The dump is a single JSON document. JSON values are stored as-is;
//! binary payloads are base64-encoded.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolshed_core::StorageAdapter;

/// Current dump format version
pub const DUMP_FORMAT_VERSION: u32 = 1;

/// One exported key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_base64: Option<String>,
}

/// A whole dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpFile {
    pub format_version: u32,
    pub adapter: String,
    pub exported_at: String,
    pub entries: Vec<DumpEntry>,
}

/// Export every key under `prefix`
pub async fn export(adapter: &dyn StorageAdapter, prefix: Option<&str>) -> Result<DumpFile> {
    let mut keys = adapter.list(prefix).await;
    keys.sort();

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(value) = adapter.get(&key).await {
            entries.push(DumpEntry { key, value: Some(value), payload_base64: None });
        } else if let Some(data) = adapter.get_bytes(&key).await {
            entries.push(DumpEntry {
                key,
                value: None,
                payload_base64: Some(STANDARD.encode(&data)),
            });
        } else {
            tracing::warn!("Skipping unreadable key {}", key);
        }
    }

    Ok(DumpFile {
        format_version: DUMP_FORMAT_VERSION,
        adapter: adapter.name().to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        entries,
    })
}

/// Write every entry of `dump` into `adapter`, returning the number written
pub async fn import(adapter: &dyn StorageAdapter, dump: &DumpFile) -> Result<usize> {
    if dump.format_version != DUMP_FORMAT_VERSION {
        return Err(anyhow!(
            "Unsupported dump format version {} (expected {})",
            dump.format_version,
            DUMP_FORMAT_VERSION
        ));
    }

    let mut written = 0;
    for entry in &dump.entries {
        match (&entry.value, &entry.payload_base64) {
            (Some(value), _) => adapter
                .set(&entry.key, value)
                .await
                .with_context(|| format!("Failed to import {}", entry.key))?,
            (None, Some(encoded)) => {
                let data = STANDARD
                    .decode(encoded)
                    .with_context(|| format!("Invalid base64 payload for {}", entry.key))?;
                adapter
                    .set_bytes(&entry.key, Bytes::from(data))
                    .await
                    .with_context(|| format!("Failed to import {}", entry.key))?;
            }
            (None, None) => {
                tracing::warn!("Dump entry {} has no content, skipped", entry.key);
                continue;
            }
        }
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolshed_core::{DatabaseAdapter, LocalStorageAdapter};

    #[tokio::test]
    async fn test_export_import_between_adapters() {
        let source = DatabaseAdapter::open_in_memory(1 << 20).unwrap();
        source.set("notes:1", &json!({"title": "a"})).await.unwrap();
        source
            .set_bytes("soundLibrary:audio:1", Bytes::from_static(b"\x00\x01wav"))
            .await
            .unwrap();
        source.set("chat:1", &json!([1, 2])).await.unwrap();

        let dump = export(&source, Some("notes:")).await.unwrap();
        assert_eq!(dump.adapter, "indexedDB");
        assert_eq!(dump.entries.len(), 1);

        let full = export(&source, None).await.unwrap();
        assert_eq!(full.entries.len(), 3);

        let target = DatabaseAdapter::open_in_memory(1 << 20).unwrap();
        assert_eq!(import(&target, &full).await.unwrap(), 3);
        assert_eq!(target.get("notes:1").await, Some(json!({"title": "a"})));
        assert_eq!(
            target.get_bytes("soundLibrary:audio:1").await,
            Some(Bytes::from_static(b"\x00\x01wav"))
        );
    }

    #[tokio::test]
    async fn test_binary_import_into_local_storage_fails() {
        let dump = DumpFile {
            format_version: DUMP_FORMAT_VERSION,
            adapter: "opfs".to_string(),
            exported_at: String::new(),
            entries: vec![DumpEntry {
                key: "audio:1".to_string(),
                value: None,
                payload_base64: Some(STANDARD.encode(b"abc")),
            }],
        };
        let target = LocalStorageAdapter::in_memory(1 << 20);
        assert!(import(&target, &dump).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let dump = DumpFile {
            format_version: 99,
            adapter: "x".to_string(),
            exported_at: String::new(),
            entries: Vec::new(),
        };
        let target = LocalStorageAdapter::in_memory(1024);
        assert!(import(&target, &dump).await.is_err());
    }
}
