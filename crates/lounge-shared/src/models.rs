//! Document models persisted through the document store.
//!
//! Bodies serialize with camelCase field names so they match the documents
//! written by every other client of the same database.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::leveling::Progress;
use crate::types::{Role, UserId};

/// A model stored in a named document collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

fn default_level() -> u32 {
    1
}

/// An account. `message_count` is the source of truth for progression;
/// `level` and `points` are derived from it (see [`Progress`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_mod: bool,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub points: u64,
    /// Epoch millis. The user may not post while `now < chat_timeout_until`.
    #[serde(default)]
    pub chat_timeout_until: Option<i64>,
    #[serde(default)]
    pub owned_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipped_badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipped_color: Option<String>,
    #[serde(default)]
    pub device_fingerprints: Vec<String>,
    #[serde(default)]
    pub created: i64,
}

impl User {
    /// A fresh account at level 1 with no roles.
    pub fn new(username: impl Into<String>, created: i64) -> Self {
        Self {
            username: username.into(),
            is_admin: false,
            is_mod: false,
            message_count: 0,
            level: 1,
            points: 0,
            chat_timeout_until: None,
            owned_items: Vec::new(),
            equipped_badge: None,
            equipped_color: None,
            device_fingerprints: Vec::new(),
            created,
        }
    }

    pub fn role(&self) -> Role {
        Role::from_flags(self.is_admin, self.is_mod)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        let (is_admin, is_mod) = role.to_flags();
        self.is_admin = is_admin;
        self.is_mod = is_mod;
        self
    }

    /// Milliseconds of timeout left at `now`, if any.
    pub fn timeout_remaining(&self, now: i64) -> Option<i64> {
        match self.chat_timeout_until {
            Some(until) if now < until => Some(until - now),
            _ => None,
        }
    }

    pub fn is_timed_out(&self, now: i64) -> bool {
        self.timeout_remaining(now).is_some()
    }

    pub fn owns(&self, item_id: &str) -> bool {
        self.owned_items.iter().any(|id| id == item_id)
    }

    pub fn progress(&self) -> Progress {
        Progress::from_message_count(self.message_count)
    }
}

impl Record for User {
    const COLLECTION: &'static str = constants::USERS;
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Heartbeat entry for one connected session, stored at
/// `chatPresence/{userId}` in the presence tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub username: String,
    /// Epoch millis of the last heartbeat.
    pub last_active: i64,
}

impl PresenceRecord {
    pub fn is_fresh(&self, now: i64, threshold_ms: i64) -> bool {
        now - self.last_active < threshold_ms
    }
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

/// A message in the live chat room. Append-only; removed only by
/// moderation cascades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub username: String,
    pub user_id: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub is_system: bool,
}

impl ChatMessage {
    /// An announcement authored by the system rather than a user.
    pub fn system(text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            username: constants::SYSTEM_USERNAME.to_string(),
            user_id: UserId::new(constants::SYSTEM_USERNAME),
            text: text.into(),
            gif_id: None,
            timestamp,
            is_system: true,
        }
    }
}

impl Record for ChatMessage {
    const COLLECTION: &'static str = constants::CHAT_MESSAGES;
}

// ---------------------------------------------------------------------------
// Comment
// ---------------------------------------------------------------------------

/// A comment on a thread (review, blog post, ...). Replies nest one level
/// deep: a reply's parent is always a top-level comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub thread_id: String,
    pub user_id: UserId,
    pub username: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_comment_id.is_some()
    }
}

impl Record for Comment {
    const COLLECTION: &'static str = constants::COMMENTS;
}

// ---------------------------------------------------------------------------
// Bans
// ---------------------------------------------------------------------------

/// Keyed by the lowercased username. Outlives the banned account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BannedUsername {
    pub username: String,
    pub banned_by: UserId,
    pub banned_at: i64,
}

impl Record for BannedUsername {
    const COLLECTION: &'static str = constants::BANNED_USERNAMES;
}

/// Keyed by the device fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBan {
    pub fingerprint: String,
    pub banned_at: i64,
    pub banned_by: UserId,
    pub username: String,
}

impl Record for DeviceBan {
    const COLLECTION: &'static str = constants::BANNED_DEVICES;
}

// ---------------------------------------------------------------------------
// Shop item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Badge,
    Color,
    Gif,
}

/// Catalogue entry owned by the shop. Read-only from the chat's side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShopItem {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Color code or image URL depending on `kind`.
    pub value: String,
    #[serde(default)]
    pub price: u64,
}

impl Record for ShopItem {
    const COLLECTION: &'static str = constants::SHOP_ITEMS;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_document_field_names() {
        let user = User::new("paint", 1).with_role(Role::Mod);
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["isMod"], true);
        assert_eq!(value["messageCount"], 0);
        assert!(value["chatTimeoutUntil"].is_null());
    }

    #[test]
    fn test_user_defaults_from_sparse_document() {
        let user: User = serde_json::from_value(serde_json::json!({
            "username": "sparse",
            "points": 0,
            "created": 10,
        }))
        .unwrap();
        assert_eq!(user.level, 1);
        assert_eq!(user.role(), Role::User);
        assert!(user.owned_items.is_empty());
    }

    #[test]
    fn test_timeout_remaining() {
        let mut user = User::new("late", 0);
        assert_eq!(user.timeout_remaining(100), None);
        user.chat_timeout_until = Some(1_000);
        assert_eq!(user.timeout_remaining(400), Some(600));
        assert_eq!(user.timeout_remaining(1_000), None);
    }

    #[test]
    fn test_shop_item_type_field() {
        let item: ShopItem = serde_json::from_value(serde_json::json!({
            "type": "gif",
            "value": "https://example.com/dance.gif",
            "price": 100,
        }))
        .unwrap();
        assert_eq!(item.kind, ItemKind::Gif);
    }

    #[test]
    fn test_system_message_flag() {
        let msg = ChatMessage::system("hello", 5);
        assert!(msg.is_system);
        assert_eq!(msg.username, constants::SYSTEM_USERNAME);
    }
}
