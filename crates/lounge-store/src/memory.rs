//! In-process [`DocumentStore`].

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::document::{merge_shallow, DocumentStore};
use crate::error::{Result, StoreError};
use crate::query::{DocSnapshot, Query};

const CHANGE_CAPACITY: usize = 256;

/// Documents held in memory, shared by every client that holds the same
/// handle. Supports failure injection for individual documents so callers'
/// best-effort paths can be exercised.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    failing: RwLock<HashSet<(String, String)>>,
    changes: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            collections: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            changes,
        }
    }

    /// Make every write to `collection/id` fail with `Unavailable`.
    pub async fn fail_writes_to(&self, collection: &str, id: &str) {
        self.failing
            .write()
            .await
            .insert((collection.to_string(), id.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    /// Number of documents currently in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn check_writable(&self, collection: &str, id: &str) -> Result<()> {
        let failing = self.failing.read().await;
        if failing.contains(&(collection.to_string(), id.to_string())) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for {collection}/{id}"
            )));
        }
        Ok(())
    }

    fn announce(&self, collection: &str) {
        // No subscribers is fine.
        let _ = self.changes.send(collection.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn create(&self, collection: &str, doc: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, doc).await?;
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        self.check_writable(collection, id).await?;
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        }
        self.announce(collection);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> Result<()> {
        self.check_writable(collection, id).await?;
        {
            let mut collections = self.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            merge_shallow(doc, partial);
        }
        self.announce(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.check_writable(collection, id).await?;
        let removed = {
            let mut collections = self.collections.write().await;
            collections
                .get_mut(collection)
                .and_then(|c| c.remove(id))
                .is_some()
        };
        if removed {
            self.announce(collection);
        }
        Ok(removed)
    }

    async fn query(&self, query: &Query) -> Result<Vec<DocSnapshot>> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|c| c.iter())
            .map(|(id, data)| DocSnapshot {
                id: id.clone(),
                data: data.clone(),
            });
        Ok(query.apply(docs))
    }

    fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryStore::new();
        let id = store.create("users", json!({ "username": "a" })).await.unwrap();
        store
            .update("users", &id, json!({ "points": 25 }))
            .await
            .unwrap();

        let doc = store.get("users", &id).await.unwrap().unwrap();
        assert_eq!(doc, json!({ "username": "a", "points": 25 }));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update("users", "ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put("m", "1", json!({})).await.unwrap();
        assert!(store.delete("m", "1").await.unwrap());
        assert!(!store.delete("m", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.put("m", "1", json!({})).await.unwrap();
        store.fail_writes_to("m", "1").await;
        assert!(matches!(
            store.delete("m", "1").await,
            Err(StoreError::Unavailable(_))
        ));
        store.clear_failures().await;
        assert!(store.delete("m", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_announce_collection() {
        let store = MemoryStore::new();
        let mut rx = store.changes();
        store.put("users", "u", json!({})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "users");
    }
}
