//! Notes

use crate::entity_store::{Entity, EntityStore, PaginateOptions, SortOrder};
use crate::id::IdStrategy;
use crate::storage::{Result, StorageAdapter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Key prefix of note records
pub const NOTES_PREFIX: &str = "notes";

/// A note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    /// New note stamped with the current time
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.content.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

/// Note storage
pub struct NoteStore {
    store: EntityStore<Note>,
}

impl NoteStore {
    /// Notes stored on `adapter`
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            store: EntityStore::new(adapter, NOTES_PREFIX, IdStrategy::Uuid),
        }
    }

    /// Underlying generic store
    pub fn store(&self) -> &EntityStore<Note> {
        &self.store
    }

    /// Create a note and return its id
    pub async fn create_note(&self, title: &str, content: &str, tags: &[&str]) -> Result<String> {
        let mut note = Note::new(title, content);
        note.tags = tags.iter().map(|t| t.to_string()).collect();
        self.store.create(&note).await
    }

    /// Load one note
    pub async fn get(&self, id: &str) -> Option<Note> {
        self.store.get(id).await
    }

    /// Change title and/or content and bump `updated_at`
    pub async fn update_content(&self, id: &str, title: Option<&str>, content: Option<&str>) -> Result<Note> {
        let mut partial = Map::new();
        if let Some(title) = title {
            partial.insert("title".to_string(), json!(title));
        }
        if let Some(content) = content {
            partial.insert("content".to_string(), json!(content));
        }
        partial.insert(
            "updated_at".to_string(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        self.store.update(id, Value::Object(partial)).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }

    /// Every stored note
    pub async fn list(&self) -> Vec<Entity<Note>> {
        self.store.list(None).await
    }

    /// Case-insensitive match on title, content or tags
    pub async fn search(&self, query: &str) -> Vec<Entity<Note>> {
        let needle = query.to_lowercase();
        self.store.list(Some(&|note: &Note| note.matches(&needle))).await
    }

    /// Most recently updated notes first
    pub async fn recent(&self, limit: usize) -> Vec<Entity<Note>> {
        self.store
            .paginate(&PaginateOptions {
                offset: 0,
                limit,
                sort_by: Some("updated_at".to_string()),
                sort_order: SortOrder::Desc,
            })
            .await
            .items
    }
}
