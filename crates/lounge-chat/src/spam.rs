//! Per-user send throttling and near-duplicate detection.
//!
//! History lives only in this process: a restarted client starts every
//! user with a clean window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lounge_shared::UserId;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::SpamConfig;
use crate::error::SpamReason;

#[derive(Debug, Clone)]
struct Sent {
    at: i64,
    /// Lowercased text; empty for GIF-only sends.
    text: String,
}

#[derive(Clone)]
pub struct SpamGuard {
    windows: Arc<Mutex<HashMap<UserId, VecDeque<Sent>>>>,
    config: SpamConfig,
}

impl SpamGuard {
    pub fn new(config: SpamConfig) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Decide whether `user` may send `text` at `now`. An empty `text`
    /// means a GIF-only send, which skips the repetition rules.
    ///
    /// Checking does not record anything; call [`record`](Self::record)
    /// once the message has actually been stored.
    pub async fn check(&self, user: &UserId, text: &str, now: i64) -> Result<(), SpamReason> {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(user) else {
            return Ok(());
        };
        self.prune(window, now);

        if let Some(last) = window.back() {
            if now - last.at < self.config.min_gap_ms {
                debug!(user = %user, "send refused: too fast");
                return Err(SpamReason::TooFast);
            }
        }

        if window.len() >= self.config.max_per_window {
            debug!(user = %user, count = window.len(), "send refused: window full");
            return Err(SpamReason::TooMany);
        }

        let candidate = text.trim().to_lowercase();
        if candidate.is_empty() {
            return Ok(());
        }

        let repeats = window.iter().filter(|s| s.text == candidate).count();
        if repeats >= self.config.max_repeats {
            debug!(user = %user, repeats, "send refused: repeated text");
            return Err(SpamReason::Repeated);
        }

        let similar = window
            .iter()
            .filter(|s| !s.text.is_empty())
            .filter(|s| similarity(&s.text, &candidate) > self.config.similarity_threshold)
            .count();
        if similar >= self.config.max_repeats {
            debug!(user = %user, similar, "send refused: near-duplicate text");
            return Err(SpamReason::NearDuplicate);
        }

        Ok(())
    }

    /// Append an accepted send to `user`'s window.
    pub async fn record(&self, user: &UserId, text: &str, now: i64) {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(user.clone()).or_default();
        self.prune(window, now);
        window.push_back(Sent {
            at: now,
            text: text.trim().to_lowercase(),
        });
    }

    /// Drop users whose windows have fully expired.
    pub async fn purge_stale(&self, now: i64) {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, window| {
            window
                .back()
                .map(|last| now - last.at < self.config.window_ms)
                .unwrap_or(false)
        });
    }

    /// Forget everything about `user`.
    pub async fn reset(&self, user: &UserId) {
        self.windows.lock().await.remove(user);
    }

    fn prune(&self, window: &mut VecDeque<Sent>, now: i64) {
        while let Some(first) = window.front() {
            if now - first.at >= self.config.window_ms {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for SpamGuard {
    fn default() -> Self {
        Self::new(SpamConfig::default())
    }
}

/// `1 - distance / longer length`, over characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    async fn send(guard: &SpamGuard, user: &UserId, text: &str, now: i64) -> Result<(), SpamReason> {
        guard.check(user, text, now).await?;
        guard.record(user, text, now).await;
        Ok(())
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!(similarity("hello there friend", "hello there freind") > 0.8);
    }

    #[tokio::test]
    async fn test_sixth_send_in_window_is_refused() {
        let guard = SpamGuard::default();
        let user = alice();
        let texts = ["good morning", "anyone here?", "new album is out", "track 3 rules", "ok bye"];
        for (i, text) in texts.iter().enumerate() {
            send(&guard, &user, text, i as i64 * 1_000).await.unwrap();
        }
        assert_eq!(
            send(&guard, &user, "a different topic entirely", 5_000).await,
            Err(SpamReason::TooMany)
        );

        // Window has slid past every earlier send.
        send(&guard, &user, "back again later", 15_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_min_gap_enforced() {
        let guard = SpamGuard::default();
        let user = alice();
        send(&guard, &user, "one", 0).await.unwrap();
        assert_eq!(send(&guard, &user, "two", 499).await, Err(SpamReason::TooFast));
        send(&guard, &user, "two", 500).await.unwrap();
    }

    #[tokio::test]
    async fn test_identical_repeats_refused() {
        let guard = SpamGuard::default();
        let user = alice();
        for i in 0..3 {
            send(&guard, &user, "LOL", i * 1_000).await.unwrap();
        }
        assert_eq!(send(&guard, &user, "lol", 3_000).await, Err(SpamReason::Repeated));
    }

    #[tokio::test]
    async fn test_near_duplicates_refused() {
        let guard = SpamGuard::default();
        let user = alice();
        send(&guard, &user, "hello there friend", 0).await.unwrap();
        send(&guard, &user, "hello there freind", 1_000).await.unwrap();
        send(&guard, &user, "hello there frend", 2_000).await.unwrap();
        assert_eq!(
            send(&guard, &user, "hello tere friend", 3_000).await,
            Err(SpamReason::NearDuplicate)
        );
    }

    #[tokio::test]
    async fn test_gif_only_skips_repetition_rules() {
        let guard = SpamGuard::default();
        let user = alice();
        for i in 0..4 {
            send(&guard, &user, "", i * 1_000).await.unwrap();
        }
        send(&guard, &user, "", 4_100).await.unwrap();
        assert_eq!(send(&guard, &user, "", 5_000).await, Err(SpamReason::TooMany));
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let guard = SpamGuard::default();
        send(&guard, &alice(), "hi", 0).await.unwrap();
        send(&guard, &UserId::new("bob"), "hi", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let guard = SpamGuard::default();
        send(&guard, &alice(), "hi", 0).await.unwrap();
        guard.purge_stale(20_000).await;
        assert!(guard.windows.lock().await.is_empty());
    }
}
