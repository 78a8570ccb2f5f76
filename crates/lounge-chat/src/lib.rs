//! # lounge-chat
//!
//! The chat engine of a community site: who is online, who may post, what
//! they may post, and what happens to them when they misbehave.
//!
//! - [`ChatSessionController`] is the per-client entry point. It follows
//!   the live message and presence feeds, runs the send pipeline and emits
//!   [`SessionEvent`]s for a UI.
//! - [`ModerationEngine`] carries out timeouts, bans and admin edits.
//! - [`SpamGuard`] and [`PresenceTracker`] hold the per-process state the
//!   session consults.
//!
//! Persistence, presence and identity are reached through the traits in
//! `lounge-store`; pure policies (content filter, leveling, username
//! rules) live in `lounge-shared`.

pub mod accounts;
pub mod cache;
pub mod config;
pub mod events;
pub mod moderation;
pub mod presence;
pub mod session;
pub mod spam;
pub mod telemetry;

mod error;

pub use accounts::AccountService;
pub use cache::DocumentCache;
pub use config::{ChatConfig, SpamConfig};
pub use error::{ChatError, ContentRejection, Remaining, Result, SpamReason};
pub use events::{AuthorView, ConnectionState, OnlineUser, RenderedMessage, SessionEvent};
pub use moderation::{CascadeReport, ModerationEngine};
pub use presence::{PresenceTracker, Viewer};
pub use session::{ChatSessionController, SessionDeps};
pub use spam::SpamGuard;
