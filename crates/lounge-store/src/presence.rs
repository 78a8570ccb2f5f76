//! Ephemeral presence tree: `/`-separated paths mapping to JSON values,
//! with server-side removal hooks that fire when a connection drops.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::Result;

const CHANGE_CAPACITY: usize = 256;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Removing a missing path is a no-op.
    async fn remove(&self, path: &str) -> Result<()>;

    /// The value at `path`; interior nodes come back as objects of children.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Ask the backend to remove `path` once `connection` goes away.
    /// Delivery is best-effort and may lag the actual disconnect.
    async fn on_disconnect_remove(&self, connection: &str, path: &str) -> Result<()>;

    async fn cancel_on_disconnect(&self, connection: &str, path: &str) -> Result<()>;

    /// Paths as they change.
    fn changes(&self) -> broadcast::Receiver<String>;
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Default)]
struct Tree {
    root: Map<String, Value>,
    hooks: HashMap<String, Vec<String>>,
}

impl Tree {
    fn set(&mut self, path: &str, value: Value) {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            if let Value::Object(map) = value {
                self.root = map;
            }
            return;
        };

        let mut node = &mut self.root;
        for seg in parents {
            let child = node
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = match child {
                Value::Object(map) => map,
                _ => return,
            };
        }
        node.insert(last.to_string(), value);
    }

    fn remove(&mut self, path: &str) -> bool {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            let had = !self.root.is_empty();
            self.root.clear();
            return had;
        };

        let mut node = &mut self.root;
        for seg in parents {
            node = match node.get_mut(*seg) {
                Some(Value::Object(map)) => map,
                _ => return false,
            };
        }
        node.remove(*last).is_some()
    }

    fn get(&self, path: &str) -> Option<Value> {
        let segs = segments(path);
        let mut node = &self.root;
        let Some((last, parents)) = segs.split_last() else {
            return Some(Value::Object(self.root.clone()));
        };
        for seg in parents {
            node = match node.get(*seg) {
                Some(Value::Object(map)) => map,
                _ => return None,
            };
        }
        node.get(*last).cloned()
    }
}

/// In-process [`PresenceStore`]. [`disconnect`](Self::disconnect) plays the
/// role of the backend noticing a dropped connection.
pub struct MemoryPresence {
    tree: Mutex<Tree>,
    changes: broadcast::Sender<String>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            tree: Mutex::new(Tree::default()),
            changes,
        }
    }

    /// Run and clear every removal hook registered for `connection`.
    pub async fn disconnect(&self, connection: &str) {
        let removed: Vec<String> = {
            let mut tree = self.tree.lock().await;
            let paths = tree.hooks.remove(connection).unwrap_or_default();
            paths.into_iter().filter(|p| tree.remove(p)).collect()
        };
        debug!(connection, removed = removed.len(), "connection dropped");
        for path in removed {
            let _ = self.changes.send(path);
        }
    }
}

impl Default for MemoryPresence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.tree.lock().await.set(path, value);
        let _ = self.changes.send(path.to_string());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let removed = self.tree.lock().await.remove(path);
        if removed {
            let _ = self.changes.send(path.to_string());
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.tree.lock().await.get(path))
    }

    async fn on_disconnect_remove(&self, connection: &str, path: &str) -> Result<()> {
        let mut tree = self.tree.lock().await;
        let paths = tree.hooks.entry(connection.to_string()).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
        Ok(())
    }

    async fn cancel_on_disconnect(&self, connection: &str, path: &str) -> Result<()> {
        let mut tree = self.tree.lock().await;
        if let Some(paths) = tree.hooks.get_mut(connection) {
            paths.retain(|p| p != path);
        }
        Ok(())
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
    async fn test_set_and_get_nested() {
        let presence = MemoryPresence::new();
        presence
            .set("chatPresence/u1", json!({ "username": "a", "lastActive": 1 }))
            .await
            .unwrap();
        presence
            .set("chatPresence/u2", json!({ "username": "b", "lastActive": 2 }))
            .await
            .unwrap();

        let all = presence.get("chatPresence").await.unwrap().unwrap();
        assert_eq!(all.as_object().unwrap().len(), 2);
        assert_eq!(
            presence.get("chatPresence/u1/username").await.unwrap(),
            Some(json!("a"))
        );
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let presence = MemoryPresence::new();
        presence.remove("chatPresence/ghost").await.unwrap();
        assert_eq!(presence.get("chatPresence/ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnect_runs_hooks() {
        let presence = MemoryPresence::new();
        presence.set("chatPresence/u1", json!({})).await.unwrap();
        presence.set("chatPresence/u2", json!({})).await.unwrap();
        presence
            .on_disconnect_remove("conn-1", "chatPresence/u1")
            .await
            .unwrap();

        presence.disconnect("conn-1").await;
        assert_eq!(presence.get("chatPresence/u1").await.unwrap(), None);
        assert!(presence.get("chatPresence/u2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_hook_does_not_fire() {
        let presence = MemoryPresence::new();
        presence.set("chatPresence/u1", json!({})).await.unwrap();
        presence
            .on_disconnect_remove("conn-1", "chatPresence/u1")
            .await
            .unwrap();
        presence
            .cancel_on_disconnect("conn-1", "chatPresence/u1")
            .await
            .unwrap();

        presence.disconnect("conn-1").await;
        assert!(presence.get("chatPresence/u1").await.unwrap().is_some());
    }
}
