//! Username normalisation shared by registration and rename.

use crate::constants::MAX_USERNAME_LEN;
use crate::error::UsernameError;
use crate::filter;

/// Trim and lowercase `raw`, then apply the local rules (length, slur list).
///
/// Uniqueness and the ban list need the store and are checked by the caller.
pub fn normalize_username(raw: &str) -> Result<String, UsernameError> {
    let username = raw.trim().to_lowercase();
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong);
    }
    if filter::contains_slur(&username) {
        return Err(UsernameError::Inappropriate);
    }
    Ok(username)
}

/// Key used for case-insensitive username comparisons and ban records.
pub fn username_key(username: &str) -> String {
    username.trim().to_lowercase()
}
