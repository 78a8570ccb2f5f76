// tests/common/helpers.rs
//! Shared wiring for the session scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use lounge_chat::{ChatConfig, ChatSessionController, SessionDeps, SessionEvent};
use lounge_shared::models::{ChatMessage, ItemKind, ShopItem, User};
use lounge_shared::{ManualClock, Role, UserId};
use lounge_store::records::{self, Entry};
use lounge_store::{MemoryIdentity, MemoryPresence, MemoryStore, Query};
use tokio::sync::broadcast;

pub const START: i64 = 1_700_000_000_000;

/// Memory backends plus a hand-driven clock, shared by every session a
/// test opens.
pub struct TestChat {
    pub store: Arc<MemoryStore>,
    pub presence: Arc<MemoryPresence>,
    pub identity: Arc<MemoryIdentity>,
    pub clock: Arc<ManualClock>,
}

impl TestChat {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            presence: Arc::new(MemoryPresence::new()),
            identity: Arc::new(MemoryIdentity::new()),
            clock: Arc::new(ManualClock::new(START)),
        }
    }

    pub fn config() -> ChatConfig {
        ChatConfig {
            presence_debounce_ms: 0,
            heartbeat_interval_secs: 3600,
            ..ChatConfig::default()
        }
    }

    pub fn session(&self) -> ChatSessionController {
        let deps = SessionDeps {
            store: self.store.clone(),
            presence: self.presence.clone(),
            identity: self.identity.clone(),
            clock: self.clock.clone(),
        };
        ChatSessionController::new(deps, Self::config())
    }

    pub async fn seed(&self, id: &str, user: User) -> UserId {
        records::put(self.store.as_ref(), id, &user).await.unwrap();
        UserId::new(id)
    }

    pub async fn seed_user(&self, id: &str, username: &str, role: Role) -> UserId {
        self.seed(id, User::new(username, START).with_role(role)).await
    }

    pub async fn seed_gif(&self, id: &str) {
        let item = ShopItem {
            name: format!("gif {id}"),
            kind: ItemKind::Gif,
            value: format!("https://media.example/{id}.gif"),
            price: 100,
        };
        records::put(self.store.as_ref(), id, &item).await.unwrap();
    }

    /// A fresh session signed in as `id`.
    pub async fn signed_in(&self, id: &UserId) -> ChatSessionController {
        let session = self.session();
        session.authenticate(id.clone()).await.unwrap();
        session
    }

    pub async fn user(&self, id: &UserId) -> Option<User> {
        records::get::<User>(self.store.as_ref(), id.as_str())
            .await
            .unwrap()
    }

    pub async fn messages(&self) -> Vec<Entry<ChatMessage>> {
        records::query::<ChatMessage>(self.store.as_ref(), &Query::collection("chatMessages"))
            .await
            .unwrap()
    }

    pub async fn system_messages(&self) -> Vec<ChatMessage> {
        self.messages()
            .await
            .into_iter()
            .map(|e| e.record)
            .filter(|m| m.is_system)
            .collect()
    }

    /// Move past the spam guard's minimum gap.
    pub fn tick(&self) {
        self.clock.advance(1_000);
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn next_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> anyhow::Result<SessionEvent> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) => continue,
                Err(e) => return Err(anyhow!("event stream closed: {e}")),
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(2), wait).await {
        Ok(result) => result,
        Err(_) => bail!("timed out waiting for session event"),
    }
}
