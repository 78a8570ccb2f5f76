//! Typed access to [`Record`] models over any [`DocumentStore`].

use lounge_shared::models::Record;

use crate::document::DocumentStore;
use crate::error::{Result, StoreError};
use crate::query::{DocSnapshot, Query};

/// A decoded document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub id: String,
    pub record: T,
}

pub fn decode<T: Record>(snapshot: DocSnapshot) -> Result<Entry<T>> {
    Ok(Entry {
        id: snapshot.id,
        record: serde_json::from_value(snapshot.data)?,
    })
}

pub async fn get<T: Record>(store: &dyn DocumentStore, id: &str) -> Result<Option<T>> {
    match store.get(T::COLLECTION, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Like [`get`] but a missing document is an error.
pub async fn require<T: Record>(store: &dyn DocumentStore, id: &str) -> Result<T> {
    get(store, id)
        .await?
        .ok_or_else(|| StoreError::not_found(T::COLLECTION, id))
}

pub async fn create<T: Record>(store: &dyn DocumentStore, record: &T) -> Result<String> {
    store
        .create(T::COLLECTION, serde_json::to_value(record)?)
        .await
}

pub async fn put<T: Record>(store: &dyn DocumentStore, id: &str, record: &T) -> Result<()> {
    store
        .put(T::COLLECTION, id, serde_json::to_value(record)?)
        .await
}

/// Run `query` against `T`'s collection. Documents that fail to decode are
/// skipped with a warning instead of failing the whole read.
pub async fn query<T: Record>(store: &dyn DocumentStore, query: &Query) -> Result<Vec<Entry<T>>> {
    let snapshots = store.query(query).await?;
    Ok(decode_all(snapshots))
}

pub fn decode_all<T: Record>(snapshots: Vec<DocSnapshot>) -> Vec<Entry<T>> {
    snapshots
        .into_iter()
        .filter_map(|snap| {
            let id = snap.id.clone();
            match decode(snap) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(
                        collection = T::COLLECTION,
                        id = %id,
                        error = %e,
                        "skipping undecodable document"
                    );
                    None
                }
            }
        })
        .collect()
}
