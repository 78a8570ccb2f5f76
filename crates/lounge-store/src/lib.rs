//! # lounge-store
//!
//! The collaborators the chat core talks to, expressed as traits:
//!
//! - [`DocumentStore`]: durable documents grouped in collections
//!   (users, messages, comments, bans, shop items),
//! - [`PresenceStore`]: an ephemeral path/value tree with disconnect hooks,
//! - [`IdentityProvider`]: who is signed in on this client.
//!
//! Live feeds are built on top of each store's change notifications by the
//! helpers in [`live`], always delivering complete snapshots rather than
//! diffs. [`MemoryStore`], [`MemoryPresence`] and [`MemoryIdentity`] back
//! tests and embedded use; [`Database`] persists documents in SQLite.

pub mod database;
pub mod document;
pub mod documents;
pub mod identity;
pub mod live;
pub mod memory;
pub mod migrations;
pub mod presence;
pub mod query;
pub mod records;

mod error;

pub use database::Database;
pub use document::DocumentStore;
pub use error::{Result, StoreError};
pub use identity::{IdentityProvider, MemoryIdentity};
pub use live::{subscribe, watch_document, watch_path, Subscription};
pub use memory::MemoryStore;
pub use presence::{MemoryPresence, PresenceStore};
pub use query::{DocSnapshot, Direction, Query};
