//! Structured-database backend
//!
//! Key/value entries in a single SQLite table (WAL mode), standing in for
//! the browser's IndexedDB. JSON values live in `value`, binary payloads in
//! `data`; a key holds one or the other.

use crate::storage::{Result, StorageAdapter, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Registry name of the database backend
pub const INDEXED_DB: &str = "indexedDB";

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            key TEXT PRIMARY KEY,
            value TEXT,
            data BLOB,
            updated_at INTEGER NOT NULL
        ) WITHOUT ROWID;",
    )?;
    Ok(())
}

/// SQLite-backed adapter
pub struct DatabaseAdapter {
    conn: Mutex<Connection>,
    quota_bytes: u64,
}

impl DatabaseAdapter {
    /// Open or create the database at `path`
    pub fn open(path: &Path, quota_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init_schema(&conn)?;
        tracing::debug!("Opened database backend at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory(quota_bytes: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("database connection lock poisoned".to_string()))
    }

    fn read_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn read_payload(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT data, value FROM entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Option<Vec<u8>>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.and_then(|(data, value)| data.or_else(|| value.map(String::into_bytes))))
    }

    fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut keys = Vec::new();
        match prefix {
            Some(p) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key FROM entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![p, p.chars().count() as i64], |row| row.get(0))?;
                for key in rows {
                    keys.push(key?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached("SELECT key FROM entries ORDER BY key")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                for key in rows {
                    keys.push(key?);
                }
            }
        }
        Ok(keys)
    }

    fn used_bytes(&self) -> Result<u64> {
        let conn = self.conn()?;
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(
                length(CAST(key AS BLOB))
                + COALESCE(length(CAST(value AS BLOB)), 0)
                + COALESCE(length(data), 0)), 0)
             FROM entries",
            [],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as u64)
    }
}

#[async_trait]
impl StorageAdapter for DatabaseAdapter {
    fn name(&self) -> &'static str {
        INDEXED_DB
    }

    async fn get(&self, key: &str) -> Option<Value> {
        match self.read_value(key) {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Malformed JSON under database key {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Database read of {} failed: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entries (key, value, data, updated_at) VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, data = NULL,
             updated_at = excluded.updated_at",
            params![key, text, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Vec<String> {
        self.list_keys(prefix).unwrap_or_else(|e| {
            tracing::warn!("Database list failed: {}", e);
            Vec::new()
        })
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match prefix {
            Some(p) => conn.execute(
                "DELETE FROM entries WHERE substr(key, 1, ?2) = ?1",
                params![p, p.chars().count() as i64],
            )?,
            None => conn.execute("DELETE FROM entries", [])?,
        };
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        let result: Result<bool> = self.conn().and_then(|conn| {
            Ok(conn
                .query_row("SELECT 1 FROM entries WHERE key = ?1", params![key], |_| Ok(()))
                .optional()?
                .is_some())
        });
        result.unwrap_or_else(|e| {
            tracing::warn!("Database exists check for {} failed: {}", key, e);
            false
        })
    }

    async fn size(&self) -> u64 {
        self.used_bytes().unwrap_or_else(|e| {
            tracing::warn!("Database size query failed: {}", e);
            0
        })
    }

    async fn available_space(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.size().await)
    }

    async fn is_supported(&self) -> bool {
        let result: Result<i64> = self
            .conn()
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?));
        result.is_ok()
    }

    fn binary_safe(&self) -> bool {
        true
    }

    async fn get_bytes(&self, key: &str) -> Option<Bytes> {
        match self.read_payload(key) {
            Ok(data) => data.map(Bytes::from),
            Err(e) => {
                tracing::warn!("Database payload read of {} failed: {}", key, e);
                None
            }
        }
    }

    async fn set_bytes(&self, key: &str, data: Bytes) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entries (key, value, data, updated_at) VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = NULL, data = excluded.data,
             updated_at = excluded.updated_at",
            params![key, data.as_ref(), chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }
}
