//! Chat sessions for the local LLM chat tool

use crate::entity_store::{Entity, EntityStore};
use crate::id::IdStrategy;
use crate::storage::{Result, StorageAdapter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Key prefix of chat session records
pub const CHAT_PREFIX: &str = "chatSessions";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Chat session storage
pub struct ChatStore {
    store: EntityStore<ChatSession>,
}

impl ChatStore {
    /// Chat sessions stored on `adapter`
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            store: EntityStore::new(adapter, CHAT_PREFIX, IdStrategy::Uuid),
        }
    }

    /// Underlying entity store
    pub fn store(&self) -> &EntityStore<ChatSession> {
        &self.store
    }

    pub async fn create_session(&self, title: &str, model: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp_millis();
        self.store
            .create(&ChatSession {
                title: title.to_string(),
                model: model.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .await
    }

    /// Load one session
    pub async fn get(&self, id: &str) -> Option<ChatSession> {
        self.store.get(id).await
    }

    /// Append a message and return the updated session
    pub async fn append_message(&self, id: &str, role: ChatRole, content: &str) -> Result<ChatSession> {
        let now = chrono::Utc::now().timestamp_millis();
        self.store
            .update_with(id, |session| {
                session.messages.push(ChatMessage {
                    role,
                    content: content.to_string(),
                    timestamp: now,
                });
                session.updated_at = now;
                Ok(())
            })
            .await
    }

    /// Change a session's title
    pub async fn rename(&self, id: &str, title: &str) -> Result<ChatSession> {
        self.store.update(id, json!({ "title": title })).await
    }

    /// Sessions, most recently active first
    pub async fn list_sessions(&self) -> Vec<Entity<ChatSession>> {
        let mut sessions = self.store.list(None).await;
        sessions.sort_by(|a, b| b.data.updated_at.cmp(&a.data.updated_at));
        sessions
    }

    /// Remove a session and its messages
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexeddb::DatabaseAdapter;
    use crate::opfs::FileSystemAdapter;
    use crate::storage::StorageError;
    use tempfile::TempDir;

    fn create_test_store() -> ChatStore {
        ChatStore::new(Arc::new(DatabaseAdapter::open_in_memory(1024 * 1024).unwrap()))
    }

    #[tokio::test]
    async fn test_conversation() {
        let chats = create_test_store();
        let id = chats.create_session("New chat", "gemma-2b").await.unwrap();
        chats.append_message(&id, ChatRole::User, "hello").await.unwrap();
        let session = chats
            .append_message(&id, ChatRole::Assistant, "hi there")
            .await
            .unwrap();

        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert_eq!(session.messages[1].content, "hi there");
        assert_eq!(chats.get(&id).await, Some(session));
    }

    #[tokio::test]
    async fn test_append_to_missing_session() {
        let chats = create_test_store();
        let err = chats.append_message("gone", ChatRole::User, "x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(chats.list_sessions().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let chats = Arc::new(ChatStore::new(Arc::new(FileSystemAdapter::new(
            dir.path().join("opfs"),
            1 << 30,
        ))));
        let id = chats.create_session("busy", "m").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let chats = chats.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                chats
                    .append_message(&id, ChatRole::User, &format!("message {}", i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let session = chats.get(&id).await.unwrap();
        assert_eq!(session.messages.len(), 16);
        let mut contents: Vec<_> = session.messages.iter().map(|m| m.content.clone()).collect();
        contents.sort();
        contents.dedup();
        assert_eq!(contents.len(), 16);
    }

    #[tokio::test]
    async fn test_rename_and_ordering() {
        let chats = create_test_store();
        let older = chats.create_session("a", "m").await.unwrap();
        let newer = chats.create_session("b", "m").await.unwrap();
        chats.store().update(&older, json!({"updated_at": 1})).await.unwrap();
        chats.store().update(&newer, json!({"updated_at": 2})).await.unwrap();

        let renamed = chats.rename(&older, "renamed").await.unwrap();
        assert_eq!(renamed.title, "renamed");

        let ids: Vec<_> = chats.list_sessions().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![newer.clone(), older.clone()]);

        chats.delete(&newer).await.unwrap();
        assert_eq!(chats.list_sessions().await.len(), 1);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_value(ChatRole::Assistant).unwrap(), json!("assistant"));
    }
}
