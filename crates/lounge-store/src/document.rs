//! The document store contract.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::query::{DocSnapshot, Query};

/// Durable documents grouped in named collections.
///
/// Writes are last-write-wins with no multi-document transactions. Every
/// successful write announces the touched collection on [`changes`].
///
/// [`changes`]: DocumentStore::changes
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Insert under a freshly generated id and return that id.
    async fn create(&self, collection: &str, doc: Value) -> Result<String>;

    /// Insert or replace the document at `id`.
    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    /// Shallow-merge `partial` into an existing document.
    /// Fails with `NotFound` when the document is missing.
    async fn update(&self, collection: &str, id: &str, partial: Value) -> Result<()>;

    /// Remove a document. Deleting something already gone is not an error;
    /// the return value says whether anything was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    async fn query(&self, query: &Query) -> Result<Vec<DocSnapshot>>;

    /// Names of collections as they change.
    fn changes(&self) -> broadcast::Receiver<String>;
}

/// Copy each top-level field of `partial` onto `target`.
pub fn merge_shallow(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => {
            for (k, v) in partial {
                target.insert(k, v);
            }
        }
        (target, partial) => *target = partial,
    }
}
