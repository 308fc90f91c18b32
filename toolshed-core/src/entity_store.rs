//! Generic typed entity store
//!
//! An [`EntityStore`] scopes an adapter to one entity kind by prefixing every
//! key with `<prefix>:`. Listing, counting and pagination all scan the
//! prefix and work in memory, so their cost is proportional to the number
//! of stored entities regardless of the page size.
//!
//! Reads degrade to empty/absent results with a warning; writes propagate
//! their errors.

use crate::id::{generate_id, IdStrategy};
use crate::storage::{Result, StorageAdapter, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Id reserved for the aggregate metadata record of a prefix
pub const METADATA_ID: &str = "metadata";

/// A stored record annotated with its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
    pub id: String,
    pub data: T,
}

/// Sort direction for pagination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Paging window and ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginateOptions {
    pub offset: usize,
    pub limit: usize,
    /// Top-level field to sort by; `"id"` sorts by entity id
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
            sort_by: None,
            sort_order: SortOrder::Asc,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<Entity<T>>,
    /// Number of entities in the whole store
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for sorting
///
/// Values of different types order as null < bool < number < string <
/// array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = compare_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Shallow merge of `partial`'s top-level fields into `base`
fn merge_fields(base: &mut Value, partial: Value) -> Result<()> {
    match (base, partial) {
        (Value::Object(base), Value::Object(partial)) => {
            for (k, v) in partial {
                base.insert(k, v);
            }
            Ok(())
        }
        (_, Value::Object(_)) => Err(StorageError::InvalidInput(
            "stored record is not an object and cannot be merged".to_string(),
        )),
        _ => Err(StorageError::InvalidInput(
            "partial update must be a JSON object".to_string(),
        )),
    }
}

/// Typed CRUD layer over a [`StorageAdapter`]
pub struct EntityStore<T> {
    adapter: Arc<dyn StorageAdapter>,
    prefix: String,
    id_strategy: IdStrategy,
    update_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EntityStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a store over `adapter` for keys under `<prefix>:`
    pub fn new(adapter: Arc<dyn StorageAdapter>, prefix: impl Into<String>, id_strategy: IdStrategy) -> Self {
        Self {
            adapter,
            prefix: prefix.into(),
            id_strategy,
            update_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Key prefix (without the trailing colon)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Backing adapter
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Id strategy used by [`create`](Self::create)
    pub fn id_strategy(&self) -> &IdStrategy {
        &self.id_strategy
    }

    /// Full storage key of `id`
    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn key_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }

    fn decode(&self, id: &str, value: &Value) -> Option<T> {
        match T::deserialize(value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!("Skipping undecodable record {}: {}", self.key(id), e);
                None
            }
        }
    }

    /// Raw values of every entity under the prefix
    async fn load_all(&self) -> Vec<(String, Value)> {
        let key_prefix = self.key_prefix();
        let mut rows = Vec::new();
        for key in self.adapter.list(Some(&key_prefix)).await {
            let Some(id) = key.strip_prefix(&key_prefix) else {
                continue;
            };
            if id == METADATA_ID {
                continue;
            }
            if let Some(value) = self.adapter.get(&key).await {
                rows.push((id.to_string(), value));
            }
        }
        rows
    }

    /// Every decodable entity paired with its raw value
    async fn load_decoded(&self) -> Vec<(Entity<T>, Value)> {
        self.load_all()
            .await
            .into_iter()
            .filter_map(|(id, value)| {
                let data = self.decode(&id, &value)?;
                Some((Entity { id, data }, value))
            })
            .collect()
    }

    /// Load one entity
    pub async fn get(&self, id: &str) -> Option<T> {
        let value = self.adapter.get(&self.key(id)).await?;
        self.decode(id, &value)
    }

    /// Store `data` under `id`, replacing any previous record
    pub async fn set(&self, id: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.adapter.set(&self.key(id), &value).await
    }

    /// Remove one entity. Missing ids are ignored.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.adapter.delete(&self.key(id)).await
    }

    /// Check whether `id` is stored
    pub async fn exists(&self, id: &str) -> bool {
        self.adapter.exists(&self.key(id)).await
    }

    /// Remove every entity of this kind, metadata included
    pub async fn clear(&self) -> Result<()> {
        self.adapter.clear(Some(&self.key_prefix())).await
    }

    /// All entities, optionally filtered
    pub async fn list(&self, filter: Option<&(dyn Fn(&T) -> bool + Sync)>) -> Vec<Entity<T>> {
        self.load_decoded()
            .await
            .into_iter()
            .map(|(entity, _)| entity)
            .filter(|entity| filter.map_or(true, |f| f(&entity.data)))
            .collect()
    }

    /// Persist a new entity and return its generated id
    pub async fn create(&self, data: &T) -> Result<String> {
        let value = serde_json::to_value(data)?;
        let id = generate_id(&self.id_strategy, &value)?;
        self.adapter.set(&self.key(&id), &value).await?;
        tracing::debug!("Created {}", self.key(&id));
        Ok(id)
    }

    /// Merge `partial`'s top-level fields into an existing entity
    ///
    /// Fails with `NotFound` when `id` is not stored. Updates through one
    /// store are serialized; concurrent writers using other store instances
    /// over the same adapter can still overwrite each other.
    pub async fn update(&self, id: &str, partial: Value) -> Result<T> {
        let _guard = self.update_lock.lock().await;
        let key = self.key(id);
        let mut current = self
            .adapter
            .get(&key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        merge_fields(&mut current, partial)?;
        let data: T = serde_json::from_value(current)?;
        let value = serde_json::to_value(&data)?;
        self.adapter.set(&key, &value).await?;
        Ok(data)
    }

    /// Read-modify-write of one entity under the store's update lock
    ///
    /// `modify` sees the current record and may fail, in which case
    /// nothing is written. Fails with `NotFound` when `id` is not stored.
    pub async fn update_with<F>(&self, id: &str, modify: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()> + Send,
    {
        let _guard = self.update_lock.lock().await;
        let key = self.key(id);
        let current = self
            .adapter
            .get(&key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        let mut data: T = serde_json::from_value(current)?;
        modify(&mut data)?;
        let value = serde_json::to_value(&data)?;
        self.adapter.set(&key, &value).await?;
        Ok(data)
    }

    /// Number of stored entities
    pub async fn count(&self) -> usize {
        self.list(None).await.len()
    }

    /// Sorted, windowed view of all entities
    pub async fn paginate(&self, options: &PaginateOptions) -> Page<T> {
        let mut rows = self.load_decoded().await;
        let total = rows.len();

        if let Some(field) = &options.sort_by {
            let sort_key = |(entity, value): &(Entity<T>, Value)| -> Value {
                if field == "id" {
                    Value::String(entity.id.clone())
                } else {
                    value.get(field).cloned().unwrap_or(Value::Null)
                }
            };
            rows.sort_by(|a, b| {
                let ord = compare_values(&sort_key(a), &sort_key(b));
                match options.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }

        let items: Vec<Entity<T>> = rows
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|(entity, _)| entity)
            .collect();

        Page {
            has_more: options.offset.saturating_add(options.limit) < total,
            items,
            total,
            offset: options.offset,
            limit: options.limit,
        }
    }

    /// Aggregate metadata record of this prefix
    pub async fn metadata(&self) -> Option<Value> {
        self.adapter.get(&self.key(METADATA_ID)).await
    }

    /// Replace the aggregate metadata record
    pub async fn set_metadata(&self, value: &Value) -> Result<()> {
        self.adapter.set(&self.key(METADATA_ID), value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_storage::LocalStorageAdapter;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        #[serde(default)]
        rank: i64,
    }

    fn note(title: &str, rank: i64) -> Note {
        Note {
            title: title.to_string(),
            rank,
        }
    }

    fn create_test_store() -> EntityStore<Note> {
        let adapter = Arc::new(LocalStorageAdapter::in_memory(1024 * 1024));
        EntityStore::new(adapter, "notes", IdStrategy::Uuid)
    }

    #[test]
    fn test_compare_values_across_types() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
    }

    #[tokio::test]
    async fn test_notes_scenario() {
        let store = create_test_store();
        let a = store.create(&note("a", 0)).await.unwrap();
        let b = store.create(&note("b", 0)).await.unwrap();
        assert_ne!(a, b);

        let mut listed = store.list(None).await;
        listed.sort_by(|x, y| x.data.title.cmp(&y.data.title));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], Entity { id: a, data: note("a", 0) });
        assert_eq!(listed[1], Entity { id: b, data: note("b", 0) });
        assert_eq!(store.count().await, 2);

        store.clear().await.unwrap();
        assert!(store.list(None).await.is_empty());
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = create_test_store();
        let id = store.create(&note("hello", 3)).await.unwrap();
        assert_eq!(store.get(&id).await, Some(note("hello", 3)));
        assert!(store.exists(&id).await);
        assert!(store.adapter().exists(&format!("notes:{}", id)).await);

        store.delete(&id).await.unwrap();
        assert_eq!(store.get(&id).await, None);
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = create_test_store();
        let id = store.create(&note("draft", 1)).await.unwrap();
        let updated = store.update(&id, json!({"rank": 7})).await.unwrap();
        assert_eq!(updated, note("draft", 7));
        assert_eq!(store.get(&id).await, Some(note("draft", 7)));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = create_test_store();
        let err = store.update("ghost", json!({"rank": 1})).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!store.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_shapes() {
        let store = create_test_store();
        let id = store.create(&note("x", 1)).await.unwrap();
        assert!(matches!(
            store.update(&id, json!(5)).await,
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            store.update(&id, json!({"rank": "not a number"})).await,
            Err(StorageError::Parse(_))
        ));
        assert_eq!(store.get(&id).await, Some(note("x", 1)));
    }

    #[tokio::test]
    async fn test_list_filter_and_skips_foreign_records() {
        let store = create_test_store();
        store.create(&note("keep", 1)).await.unwrap();
        store.create(&note("drop", 2)).await.unwrap();
        store.set_metadata(&json!({"version": 1})).await.unwrap();
        store.adapter().set("notes:broken", &json!({"nope": true})).await.unwrap();
        store.adapter().set("other:1", &json!({"title": "x"})).await.unwrap();

        let all = store.list(None).await;
        assert_eq!(all.len(), 2);

        let filtered = store.list(Some(&|n: &Note| n.rank > 1)).await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].data.title, "drop");
        assert_eq!(store.metadata().await, Some(json!({"version": 1})));
    }

    #[tokio::test]
    async fn test_paginate_sorted() {
        let store = create_test_store();
        for (title, rank) in [("c", 3), ("a", 1), ("e", 5), ("b", 2), ("d", 4)] {
            store.create(&note(title, rank)).await.unwrap();
        }

        let page = store
            .paginate(&PaginateOptions {
                offset: 1,
                limit: 2,
                sort_by: Some("rank".to_string()),
                sort_order: SortOrder::Desc,
            })
            .await;
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        let titles: Vec<_> = page.items.iter().map(|e| e.data.title.as_str()).collect();
        assert_eq!(titles, vec!["d", "c"]);

        let last = store
            .paginate(&PaginateOptions {
                offset: 4,
                limit: 10,
                sort_by: Some("title".to_string()),
                sort_order: SortOrder::Asc,
            })
            .await;
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].data.title, "e");
        assert!(!last.has_more);

        let beyond = store
            .paginate(&PaginateOptions {
                offset: 9,
                ..Default::default()
            })
            .await;
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 5);
    }

    #[tokio::test]
    async fn test_paginate_skips_undecodable_records() {
        let store = create_test_store();
        store.create(&note("a", 1)).await.unwrap();
        store.create(&note("b", 2)).await.unwrap();
        store.adapter().set("notes:broken", &json!({"nope": true})).await.unwrap();

        let page = store
            .paginate(&PaginateOptions {
                offset: 0,
                limit: 2,
                sort_by: Some("title".to_string()),
                sort_order: SortOrder::Asc,
            })
            .await;
        assert_eq!(page.total, store.count().await);
        assert_eq!(page.total, 2);
        assert!(!page.has_more);
        let titles: Vec<_> = page.items.iter().map(|e| e.data.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);

        let tail = store
            .paginate(&PaginateOptions {
                offset: 1,
                limit: 5,
                ..Default::default()
            })
            .await;
        assert_eq!(tail.items.len(), 1);
    }

    #[tokio::test]
    async fn test_update_with_missing_and_failing_closure() {
        let store = create_test_store();
        let err = store.update_with("ghost", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let id = store.create(&note("x", 1)).await.unwrap();
        let err = store
            .update_with(&id, |n| {
                n.rank = 99;
                Err(StorageError::InvalidInput("rejected".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(store.get(&id).await, Some(note("x", 1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_update_with_keeps_every_increment() {
        let store = Arc::new(create_test_store());
        let id = store.create(&note("counter", 0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_with(&id, |n| {
                        n.rank += 1;
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().rank, 16);
    }

    #[tokio::test]
    async fn test_paginate_by_id() {
        let adapter = Arc::new(LocalStorageAdapter::in_memory(1024 * 1024));
        let store: EntityStore<Note> =
            EntityStore::new(adapter, "notes", IdStrategy::Provided { field: "title".to_string() });
        for title in ["zeta", "alpha", "mid"] {
            store.create(&note(title, 0)).await.unwrap();
        }
        let page = store
            .paginate(&PaginateOptions {
                sort_by: Some("id".to_string()),
                ..Default::default()
            })
            .await;
        let ids: Vec<_> = page.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_hash_strategy_deduplicates() {
        let adapter = Arc::new(LocalStorageAdapter::in_memory(1024 * 1024));
        let store: EntityStore<Note> =
            EntityStore::new(adapter, "notes", IdStrategy::hash_of(&["title"]));
        let a = store.create(&note("same", 1)).await.unwrap();
        let b = store.create(&note("same", 2)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count().await, 1);
        assert_eq!(store.get(&a).await, Some(note("same", 2)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_through_one_store() {
        let store = Arc::new(create_test_store());
        let id = store.create(&note("counter", 0)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.update(&id, json!({ "title": format!("writer-{}", i) })).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let final_note = store.get(&id).await.unwrap();
        assert!(final_note.title.starts_with("writer-"));
        assert_eq!(final_note.rank, 0);
    }
}
