use std::fmt;

use lounge_shared::UsernameError;
use lounge_store::StoreError;
use thiserror::Error;

/// Time left on a chat timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining(pub chrono::Duration);

impl Remaining {
    pub fn from_millis(millis: i64) -> Self {
        Self(chrono::Duration::milliseconds(millis.max(0)))
    }

    /// Whole minutes left, rounded up so "0m" is never shown while a
    /// timeout is still active.
    pub fn minutes_ceil(&self) -> i64 {
        let millis = self.0.num_milliseconds();
        (millis + 59_999) / 60_000
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.minutes_ceil();
        let (hours, minutes) = (total / 60, total % 60);
        if hours > 0 {
            write!(f, "{hours}h {minutes}m")
        } else {
            write!(f, "{minutes}m")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRejection {
    Slur,
    Link,
}

impl fmt::Display for ContentRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRejection::Slur => f.write_str("Message contains inappropriate language"),
            ContentRejection::Link => f.write_str("Links are not allowed in chat"),
        }
    }
}

/// Which spam rule refused a send.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    #[error("Slow down! Wait a moment between messages")]
    TooFast,

    #[error("Too many messages. Please wait a few seconds")]
    TooMany,

    #[error("Please don't repeat the same message")]
    Repeated,

    #[error("Please don't send similar messages repeatedly")]
    NearDuplicate,
}

/// Everything a chat operation can refuse with. The display strings are
/// the short reasons shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("You must be logged in to do that")]
    AuthRequired,

    #[error("You are timed out. Time remaining: {0}")]
    TimedOut(Remaining),

    #[error("This account has been banned")]
    Banned,

    #[error("This device has been banned")]
    DeviceBanned,

    #[error("Message cannot be empty")]
    EmptyInput,

    #[error("{0}")]
    ContentRejected(ContentRejection),

    #[error("{0}")]
    RateLimited(SpamReason),

    #[error("Invalid GIF")]
    InvalidAttachment,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Something went wrong, please try again ({0})")]
    Persistence(String),

    #[error("{0}")]
    InvalidUsername(UsernameError),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Replies can only be made to top-level comments in the same thread")]
    InvalidReply,
}

impl ChatError {
    pub fn permission(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, id } => ChatError::NotFound {
                entity: collection,
                id,
            },
            other => ChatError::Persistence(other.to_string()),
        }
    }
}

impl From<UsernameError> for ChatError {
    fn from(e: UsernameError) -> Self {
        ChatError::InvalidUsername(e)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_rounds_minutes_up() {
        assert_eq!(Remaining::from_millis(65 * 60_000).to_string(), "1h 5m");
        assert_eq!(Remaining::from_millis(2 * 60_000 + 1).to_string(), "3m");
        assert_eq!(Remaining::from_millis(1).to_string(), "1m");
        assert_eq!(Remaining::from_millis(120 * 60_000).to_string(), "2h 0m");
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: ChatError = StoreError::not_found("users", "u1").into();
        assert_eq!(err, ChatError::not_found("users", "u1"));

        let err: ChatError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, ChatError::Persistence(_)));
    }

    #[test]
    fn test_timed_out_message() {
        let err = ChatError::TimedOut(Remaining::from_millis(30 * 60_000));
        assert_eq!(err.to_string(), "You are timed out. Time remaining: 30m");
    }
}
