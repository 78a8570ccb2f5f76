//! # lounge-shared
//!
//! Domain types shared by the store and chat crates: identifiers, roles,
//! the persisted document models, and the pure policies (content filter,
//! leveling, username rules) that every client applies the same way.

pub mod clock;
pub mod constants;
pub mod device;
pub mod error;
pub mod filter;
pub mod leveling;
pub mod models;
pub mod types;
pub mod username;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::UsernameError;
pub use models::*;
pub use types::{Role, UserId};
