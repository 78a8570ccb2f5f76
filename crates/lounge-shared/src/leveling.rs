//! Progression derived from a user's message count.
//!
//! Every 100 messages is a level, every 50 messages earns 25 points.

use serde::{Deserialize, Serialize};

pub const MESSAGES_PER_LEVEL: u64 = 100;
pub const MESSAGES_PER_POINT_GRANT: u64 = 50;
pub const POINTS_PER_GRANT: u64 = 25;

/// Level 1 covers 0-99 messages, level 2 covers 100-199, and so on.
pub fn level(message_count: u64) -> u32 {
    let level = message_count / MESSAGES_PER_LEVEL + 1;
    u32::try_from(level).unwrap_or(u32::MAX).max(1)
}

pub fn points(message_count: u64) -> u64 {
    message_count / MESSAGES_PER_POINT_GRANT * POINTS_PER_GRANT
}

pub fn messages_to_next_level(message_count: u64) -> u64 {
    (u64::from(level(message_count)) * MESSAGES_PER_LEVEL).saturating_sub(message_count)
}

/// The three progression fields as they must be persisted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub message_count: u64,
    pub level: u32,
    pub points: u64,
}

impl Progress {
    pub fn from_message_count(message_count: u64) -> Self {
        Self {
            message_count,
            level: level(message_count),
            points: points(message_count),
        }
    }

    /// The only sanctioned way to jump to a level: rewrite the message
    /// count to the first message of that level. Levels below 1 clamp to 1.
    pub fn for_level(level: u32) -> Self {
        let level = u64::from(level.max(1));
        Self::from_message_count((level - 1) * MESSAGES_PER_LEVEL)
    }

    /// Smallest message count whose derived points reach `points`
    /// rounded down to the grant size.
    pub fn for_points(points: u64) -> Self {
        Self::from_message_count(points / POINTS_PER_GRANT * MESSAGES_PER_POINT_GRANT)
    }

    /// One more message.
    pub fn next(self) -> Self {
        Self::from_message_count(self.message_count.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_floor_is_one() {
        assert_eq!(level(0), 1);
        assert_eq!(level(99), 1);
        assert_eq!(level(100), 2);
        assert_eq!(level(250), 3);
    }

    #[test]
    fn test_level_monotonic_and_stable() {
        let mut prev = level(0);
        for n in 0..1_000 {
            let l = level(n);
            assert!(l >= 1);
            assert!(l >= prev);
            assert_eq!(l, level(n));
            prev = l;
        }
    }

    #[test]
    fn test_points_table() {
        for (n, expected) in [(0, 0), (49, 0), (50, 25), (99, 25), (100, 50), (250, 125)] {
            assert_eq!(points(n), expected, "points({n})");
        }
    }

    #[test]
    fn test_messages_to_next_level() {
        assert_eq!(messages_to_next_level(0), 100);
        assert_eq!(messages_to_next_level(99), 1);
        assert_eq!(messages_to_next_level(100), 100);
    }

    #[test]
    fn test_for_level_back_computes_count() {
        let p = Progress::for_level(5);
        assert_eq!(p.message_count, 400);
        assert_eq!(p.level, 5);
        assert_eq!(p.points, 200);
        assert_eq!(Progress::for_level(0), Progress::for_level(1));
    }

    #[test]
    fn test_for_points_keeps_fields_consistent() {
        let p = Progress::for_points(130);
        assert_eq!(p.points, 125);
        assert_eq!(p, Progress::from_message_count(p.message_count));
    }

    #[test]
    fn test_next_crosses_level() {
        let p = Progress::from_message_count(99).next();
        assert_eq!(p.message_count, 100);
        assert_eq!(p.level, 2);
    }
}
