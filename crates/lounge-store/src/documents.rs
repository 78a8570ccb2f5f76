//! [`DocumentStore`] over the `documents` table.

use async_trait::async_trait;
use lounge_shared::clock::{Clock, SystemClock};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::database::Database;
use crate::document::{merge_shallow, DocumentStore};
use crate::error::{Result, StoreError};
use crate::query::{DocSnapshot, Query};

impl Database {
    fn read_body(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    fn write_body(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (collection, id, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, body, SystemClock.now_millis()],
        )?;
        Ok(())
    }

    fn announce(&self, collection: &str) {
        let _ = self.changes.send(collection.to_string());
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.read_body(collection, id)
    }

    async fn create(&self, collection: &str, doc: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, doc).await?;
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        self.write_body(collection, id, &doc)?;
        self.announce(collection);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> Result<()> {
        // Read-modify-write without a transaction: last write wins.
        let mut doc = self
            .read_body(collection, id)?
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        merge_shallow(&mut doc, partial);
        self.write_body(collection, id, &doc)?;
        self.announce(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = {
            let conn = self.conn()?;
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?
        };
        if removed > 0 {
            self.announce(collection);
        }
        Ok(removed > 0)
    }

    async fn query(&self, query: &Query) -> Result<Vec<DocSnapshot>> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT id, body FROM documents WHERE collection = ?1")?;
            let rows = stmt
                .query_map(params![query.collection], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut docs = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            match serde_json::from_str(&body) {
                Ok(data) => docs.push(DocSnapshot { id, data }),
                Err(e) => tracing::warn!(
                    collection = %query.collection,
                    id = %id,
                    error = %e,
                    "skipping corrupt document body"
                ),
            }
        }
        Ok(query.apply(docs))
    }

    fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_update_delete() {
        let db = Database::open_in_memory().unwrap();
        db.put("users", "u1", json!({ "username": "alice", "points": 0 }))
            .await
            .unwrap();
        db.update("users", "u1", json!({ "points": 25 })).await.unwrap();

        let doc = db.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc, json!({ "username": "alice", "points": 25 }));

        assert!(db.delete("users", "u1").await.unwrap());
        assert!(!db.delete("users", "u1").await.unwrap());
        assert!(db.get("users", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.update("users", "ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let db = Database::open_in_memory().unwrap();
        for ts in [3, 1, 2] {
            db.create("chatMessages", json!({ "timestamp": ts }))
                .await
                .unwrap();
        }

        let docs = db
            .query(
                &Query::collection("chatMessages")
                    .order_by("timestamp", Direction::Desc)
                    .limit(2),
            )
            .await
            .unwrap();
        let stamps: Vec<i64> = docs
            .iter()
            .map(|d| d.data["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(stamps, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lounge.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.put("bannedUsernames", "paint", json!({ "username": "paint" }))
                .await
                .unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert!(db.get("bannedUsernames", "paint").await.unwrap().is_some());
    }
}
