use thiserror::Error;

use crate::constants::MAX_USERNAME_LEN;

/// Reasons a candidate username is rejected before any lookup happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("Username cannot be empty")]
    Empty,

    #[error("Username must be {} characters or less", MAX_USERNAME_LEN)]
    TooLong,

    #[error("Username contains inappropriate language")]
    Inappropriate,
}
