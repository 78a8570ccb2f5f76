// tests/sqlite_backend.rs
//! The session running on the SQLite document store instead of memory.

use std::sync::Arc;

use lounge_chat::{ChatConfig, ChatSessionController, SessionDeps};
use lounge_shared::models::{ChatMessage, User};
use lounge_shared::{ManualClock, UserId};
use lounge_store::{records, Database, DocumentStore, MemoryIdentity, MemoryPresence, Query};

#[tokio::test]
async fn test_messages_and_progress_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lounge.db");

    {
        let store = Arc::new(Database::open_at(&path).unwrap());
        records::put(store.as_ref(), "u1", &User::new("alice", 0)).await.unwrap();

        let deps = SessionDeps {
            store: store.clone(),
            presence: Arc::new(MemoryPresence::new()),
            identity: Arc::new(MemoryIdentity::new()),
            clock: Arc::new(ManualClock::new(10_000)),
        };
        let session = ChatSessionController::new(deps, ChatConfig::default());
        session.authenticate(UserId::new("u1")).await.unwrap();
        session.send_message("saved to disk", None).await.unwrap();
        session.disconnect().await;
    }

    let store = Database::open_at(&path).unwrap();
    let messages =
        records::query::<ChatMessage>(&store, &Query::collection("chatMessages")).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].record.text, "saved to disk");

    let user = records::get::<User>(&store, "u1").await.unwrap().unwrap();
    assert_eq!(user.message_count, 1);
    assert!(store.get("users", "missing").await.unwrap().is_none());
}
