//! What the session pushes to its UI.

use serde::Serialize;

use lounge_shared::models::{ChatMessage, ShopItem, User};
use lounge_shared::{Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

/// The slice of the author's account the renderer shows next to a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub role: Role,
    pub level: u32,
    pub badge: Option<String>,
    pub color: Option<String>,
}

impl From<&User> for AuthorView {
    fn from(user: &User) -> Self {
        Self {
            role: user.role(),
            level: user.level,
            badge: user.equipped_badge.clone(),
            color: user.equipped_color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    pub id: String,
    pub message: ChatMessage,
    /// `None` for system messages and for authors whose account is gone.
    pub author: Option<AuthorView>,
    pub gif: Option<ShopItem>,
}

impl RenderedMessage {
    pub fn is_system(&self) -> bool {
        self.message.is_system
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub username: String,
    pub user_id: UserId,
    pub role: Role,
    pub level: u32,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Every message present when the feed was first read.
    HistoryLoaded(Vec<RenderedMessage>),
    /// Messages that arrived since the previous push, oldest first.
    MessagesAppended(Vec<RenderedMessage>),
    PresenceChanged(Vec<OnlineUser>),
    LevelUp { level: u32 },
    Notice(String),
}
