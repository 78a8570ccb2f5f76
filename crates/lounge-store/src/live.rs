//! Live feeds built from change notifications.
//!
//! Each feed re-reads its target whenever the backend reports a relevant
//! change and pushes the complete result, so consumers never apply diffs.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::DocumentStore;
use crate::presence::PresenceStore;
use crate::query::{DocSnapshot, Query};

const FEED_CAPACITY: usize = 16;

/// A running feed. Dropping it stops the background task.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// The next snapshot, or `None` once the source has shut down.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// A snapshot that is already waiting, without blocking.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Block until `changes` reports something `relevant`. Returns `false`
/// once the source is closed. A lagged receiver counts as a change.
async fn wait_for_change(
    changes: &mut broadcast::Receiver<String>,
    relevant: impl Fn(&str) -> bool,
) -> bool {
    loop {
        match changes.recv().await {
            Ok(changed) if relevant(&changed) => return true,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "change feed lagged, re-reading");
                return true;
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

/// Live results of `query`: the current result set first, then the full set
/// again after every write to the queried collection.
pub fn subscribe(store: Arc<dyn DocumentStore>, query: Query) -> Subscription<Vec<DocSnapshot>> {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    // Subscribe before the first read so no write can slip in between.
    let mut changes = store.changes();

    let task = tokio::spawn(async move {
        loop {
            match store.query(&query).await {
                Ok(docs) => {
                    if tx.send(docs).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(collection = %query.collection, error = %e, "live query failed");
                }
            }

            let collection = query.collection.clone();
            if !wait_for_change(&mut changes, |c| c == collection).await {
                break;
            }
        }
    });

    Subscription { rx, task }
}

/// Live body of one document: the current value first, then a new value
/// whenever it differs from the last one delivered. `None` means the
/// document does not exist (or no longer does).
pub fn watch_document(
    store: Arc<dyn DocumentStore>,
    collection: &str,
    id: &str,
) -> Subscription<Option<Value>> {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let mut changes = store.changes();
    let collection = collection.to_string();
    let id = id.to_string();

    let task = tokio::spawn(async move {
        let mut last: Option<Option<Value>> = None;
        loop {
            match store.get(&collection, &id).await {
                Ok(current) if last.as_ref() != Some(&current) => {
                    last = Some(current.clone());
                    if tx.send(current).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(collection = %collection, id = %id, error = %e, "document read failed"),
            }

            let watched = collection.clone();
            if !wait_for_change(&mut changes, |c| c == watched).await {
                break;
            }
        }
    });

    Subscription { rx, task }
}

/// Live value at `path` in a presence tree. Changes anywhere under or above
/// `path` trigger a re-read.
pub fn watch_path(presence: Arc<dyn PresenceStore>, path: &str) -> Subscription<Option<Value>> {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let mut changes = presence.changes();
    let path = path.trim_matches('/').to_string();

    let task = tokio::spawn(async move {
        loop {
            match presence.get(&path).await {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "presence read failed"),
            }

            let watched = path.clone();
            let relevant = move |changed: &str| {
                let changed = changed.trim_matches('/');
                changed.starts_with(&watched) || watched.starts_with(changed)
            };
            if !wait_for_change(&mut changes, relevant).await {
                break;
            }
        }
    });

    Subscription { rx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::presence::MemoryPresence;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_pushes_full_snapshots() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut feed = subscribe(store.clone(), Query::collection("chatMessages"));

        assert!(feed.next().await.unwrap().is_empty());

        store.put("chatMessages", "1", json!({ "text": "a" })).await.unwrap();
        assert_eq!(feed.next().await.unwrap().len(), 1);

        store.put("chatMessages", "2", json!({ "text": "b" })).await.unwrap();
        assert_eq!(feed.next().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_ignores_other_collections() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut feed = subscribe(store.clone(), Query::collection("chatMessages"));
        feed.next().await.unwrap();

        store.put("users", "u", json!({})).await.unwrap();
        store.put("chatMessages", "1", json!({})).await.unwrap();

        // The users write did not produce a snapshot of its own.
        assert_eq!(feed.next().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_document_skips_unrelated_writes() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store.put("users", "u1", json!({ "level": 1 })).await.unwrap();
        let mut feed = watch_document(store.clone(), "users", "u1");
        assert_eq!(feed.next().await.unwrap(), Some(json!({ "level": 1 })));

        store.put("users", "u2", json!({ "level": 9 })).await.unwrap();
        store.update("users", "u1", json!({ "level": 2 })).await.unwrap();
        assert_eq!(feed.next().await.unwrap(), Some(json!({ "level": 2 })));

        store.delete("users", "u1").await.unwrap();
        assert_eq!(feed.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_path_sees_child_writes() {
        let presence: Arc<dyn PresenceStore> = Arc::new(MemoryPresence::new());
        let mut feed = watch_path(presence.clone(), "chatPresence");
        assert_eq!(feed.next().await.unwrap(), None);

        presence
            .set("chatPresence/u1", json!({ "username": "a", "lastActive": 1 }))
            .await
            .unwrap();
        let value = feed.next().await.unwrap().unwrap();
        assert!(value.get("u1").is_some());
    }
}
