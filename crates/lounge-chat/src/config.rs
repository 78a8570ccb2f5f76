//! Chat configuration loaded from environment variables.
//!
//! All settings have defaults matching the hosted deployment, so a client
//! can start with zero configuration.

use std::str::FromStr;
use std::time::Duration;

use lounge_shared::constants::{HEARTBEAT_INTERVAL_SECS, INACTIVE_THRESHOLD_MS};

/// Spam-guard tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SpamConfig {
    /// Sliding window length.
    /// Env: `LOUNGE_SPAM_WINDOW_MS`
    pub window_ms: i64,

    /// Minimum time between two sends.
    /// Env: `LOUNGE_SPAM_MIN_GAP_MS`
    pub min_gap_ms: i64,

    /// Sends allowed inside one window.
    /// Env: `LOUNGE_SPAM_MAX_PER_WINDOW`
    pub max_per_window: usize,

    /// Identical (or near-identical) texts allowed inside one window.
    /// Env: `LOUNGE_SPAM_MAX_REPEATS`
    pub max_repeats: usize,

    /// Similarity above which two texts count as near-duplicates.
    /// Env: `LOUNGE_SPAM_SIMILARITY`
    pub similarity_threshold: f64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            min_gap_ms: 500,
            max_per_window: 5,
            max_repeats: 3,
            similarity_threshold: 0.8,
        }
    }
}

/// Chat client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// A presence record older than this is ignored.
    /// Env: `LOUNGE_INACTIVE_THRESHOLD_MS`
    /// Default: 2 minutes
    pub inactive_threshold_ms: i64,

    /// How often this client refreshes its own presence record.
    /// Env: `LOUNGE_HEARTBEAT_SECS`
    /// Default: `30`
    pub heartbeat_interval_secs: u64,

    /// Presence updates arriving within this window are coalesced.
    /// Env: `LOUNGE_PRESENCE_DEBOUNCE_MS`
    /// Default: `100`
    pub presence_debounce_ms: u64,

    /// Most recent messages kept in the live feed.
    /// Env: `LOUNGE_MESSAGE_FEED_LIMIT`
    /// Default: `50`
    pub message_feed_limit: usize,

    /// Entries kept in each join cache.
    /// Env: `LOUNGE_USER_CACHE_CAPACITY`
    /// Default: `512`
    pub user_cache_capacity: usize,

    /// Post a system message when an admin changes someone's level or points.
    /// Env: `LOUNGE_ANNOUNCE_ADMIN_CHANGES` (true/false)
    /// Default: `true`
    pub announce_admin_changes: bool,

    pub spam: SpamConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            inactive_threshold_ms: INACTIVE_THRESHOLD_MS,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            presence_debounce_ms: 100,
            message_feed_limit: 50,
            user_cache_capacity: 512,
            announce_admin_changes: true,
            spam: SpamConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        override_parsed(&lookup, "LOUNGE_INACTIVE_THRESHOLD_MS", &mut config.inactive_threshold_ms);
        override_parsed(&lookup, "LOUNGE_HEARTBEAT_SECS", &mut config.heartbeat_interval_secs);
        override_parsed(&lookup, "LOUNGE_PRESENCE_DEBOUNCE_MS", &mut config.presence_debounce_ms);
        override_parsed(&lookup, "LOUNGE_MESSAGE_FEED_LIMIT", &mut config.message_feed_limit);
        override_parsed(&lookup, "LOUNGE_USER_CACHE_CAPACITY", &mut config.user_cache_capacity);

        if let Some(val) = lookup("LOUNGE_ANNOUNCE_ADMIN_CHANGES") {
            config.announce_admin_changes = val != "false" && val != "0";
        }

        override_parsed(&lookup, "LOUNGE_SPAM_WINDOW_MS", &mut config.spam.window_ms);
        override_parsed(&lookup, "LOUNGE_SPAM_MIN_GAP_MS", &mut config.spam.min_gap_ms);
        override_parsed(&lookup, "LOUNGE_SPAM_MAX_PER_WINDOW", &mut config.spam.max_per_window);
        override_parsed(&lookup, "LOUNGE_SPAM_MAX_REPEATS", &mut config.spam.max_repeats);
        override_parsed(&lookup, "LOUNGE_SPAM_SIMILARITY", &mut config.spam.similarity_threshold);

        // The join caches need room for at least one entry.
        config.user_cache_capacity = config.user_cache_capacity.max(1);

        config
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn presence_debounce(&self) -> Duration {
        Duration::from_millis(self.presence_debounce_ms)
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
