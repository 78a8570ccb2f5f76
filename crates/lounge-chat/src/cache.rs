//! Bounded read-through caches for the joins the renderer needs
//! (message author, online user, GIF item).

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::join_all;
use lounge_shared::models::Record;
use lounge_store::{records, DocumentStore, Result};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Documents of one collection keyed by id. Only documents that exist are
/// cached; a missing id is looked up again next time.
pub struct DocumentCache<T: Record> {
    store: Arc<dyn DocumentStore>,
    entries: Mutex<LruCache<String, T>>,
}

impl<T: Record> DocumentCache<T> {
    pub fn new(store: Arc<dyn DocumentStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        if let Some(hit) = self.entries.lock().await.get(id) {
            return Ok(Some(hit.clone()));
        }

        let fetched = records::get::<T>(self.store.as_ref(), id).await?;
        if let Some(record) = &fetched {
            self.entries.lock().await.put(id.to_string(), record.clone());
        }
        Ok(fetched)
    }

    /// Resolve many ids at once. Misses are fetched concurrently; ids that
    /// are missing or fail to load are left out of the result.
    pub async fn get_many<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> HashMap<String, T> {
        let wanted: HashSet<&str> = ids.into_iter().collect();
        let mut found = HashMap::with_capacity(wanted.len());
        let mut misses = Vec::new();

        {
            let mut entries = self.entries.lock().await;
            for id in wanted {
                match entries.get(id) {
                    Some(hit) => {
                        found.insert(id.to_string(), hit.clone());
                    }
                    None => misses.push(id.to_string()),
                }
            }
        }

        if misses.is_empty() {
            return found;
        }
        debug!(collection = T::COLLECTION, misses = misses.len(), "batch fetching joins");

        let store = self.store.as_ref();
        let fetched = join_all(misses.iter().map(|id| records::get::<T>(store, id))).await;

        let mut entries = self.entries.lock().await;
        for (id, result) in misses.into_iter().zip(fetched) {
            match result {
                Ok(Some(record)) => {
                    entries.put(id.clone(), record.clone());
                    found.insert(id, record);
                }
                Ok(None) => {}
                Err(e) => warn!(collection = T::COLLECTION, id = %id, error = %e, "join fetch failed"),
            }
        }
        found
    }

    /// Seed or refresh an entry with a value already in hand.
    pub async fn insert(&self, id: &str, record: T) {
        self.entries.lock().await.put(id.to_string(), record);
    }

    pub async fn invalidate(&self, id: &str) {
        self.entries.lock().await.pop(id);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_shared::User;
    use lounge_store::MemoryStore;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        records::put(store.as_ref(), "u1", &User::new("alice", 0)).await.unwrap();
        records::put(store.as_ref(), "u2", &User::new("bob", 0)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_hit_survives_backend_change_until_invalidated() {
        let store = seeded().await;
        let cache: DocumentCache<User> = DocumentCache::new(store.clone(), 8);

        assert_eq!(cache.get("u1").await.unwrap().unwrap().username, "alice");
        records::put(store.as_ref(), "u1", &User::new("alice2", 0)).await.unwrap();
        assert_eq!(cache.get("u1").await.unwrap().unwrap().username, "alice");

        cache.invalidate("u1").await;
        assert_eq!(cache.get("u1").await.unwrap().unwrap().username, "alice2");
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let store = seeded().await;
        let cache: DocumentCache<User> = DocumentCache::new(store, 8);

        let found = cache.get_many(["u1", "u2", "ghost", "u1"]).await;
        assert_eq!(found.len(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let store = seeded().await;
        let cache: DocumentCache<User> = DocumentCache::new(store, 1);
        cache.get_many(["u1", "u2"]).await;
        assert_eq!(cache.len().await, 1);
    }
}
