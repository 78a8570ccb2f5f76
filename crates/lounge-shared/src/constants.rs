/// Document collection holding one record per account
pub const USERS: &str = "users";

/// Live chat messages (one flat room)
pub const CHAT_MESSAGES: &str = "chatMessages";

/// Thread comments, keyed by `threadId`
pub const COMMENTS: &str = "comments";

/// Permanently blocked usernames, keyed by the lowercased name
pub const BANNED_USERNAMES: &str = "bannedUsernames";

/// Permanently blocked device fingerprints
pub const BANNED_DEVICES: &str = "bannedDevices";

/// Shop catalogue (badges, name colors, GIFs)
pub const SHOP_ITEMS: &str = "shopItems";

/// Root path of the ephemeral presence tree
pub const PRESENCE_ROOT: &str = "chatPresence";

/// A user is online while their record is younger than this (2 minutes)
pub const INACTIVE_THRESHOLD_MS: i64 = 120_000;

/// Interval between presence heartbeats in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 15;

/// Username shown on system announcements
pub const SYSTEM_USERNAME: &str = "system";

/// Presence path for a single user.
pub fn presence_path(user_id: &str) -> String {
    format!("{PRESENCE_ROOT}/{user_id}")
}
