//! Timeouts, bans and admin edits.
//!
//! Actions that touch several documents run as a sequence of independent
//! steps with no transaction around them. A failed step is logged and the
//! remaining steps still run, so a crash or outage can leave an action
//! partially applied; the returned [`CascadeReport`] says what happened.

use std::sync::Arc;

use lounge_shared::constants::{self, presence_path};
use lounge_shared::leveling::Progress;
use lounge_shared::models::{BannedUsername, ChatMessage, DeviceBan, User};
use lounge_shared::username::username_key;
use lounge_shared::{Clock, Role, UserId};
use lounge_store::{records, DocumentStore, PresenceStore, Query};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::DocumentCache;
use crate::error::{ChatError, Remaining, Result};

/// Outcome of a cascading action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub messages_deleted: usize,
    pub comments_deleted: usize,
    pub account_deleted: bool,
    pub presence_cleared: bool,
    /// One line per step that failed.
    pub failures: Vec<String>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Refuse unless `actor` may moderate `target`.
pub fn authorize(actor: Role, target: Role) -> Result<()> {
    if !actor.is_staff() {
        return Err(ChatError::permission("only moderators and admins can do that"));
    }
    if !actor.can_moderate(target) {
        return Err(ChatError::permission(format!(
            "a {actor} cannot moderate a {target}"
        )));
    }
    Ok(())
}

/// Refuse if `user` is still timed out at `now`.
pub fn check_timeout(user: &User, now: i64) -> Result<()> {
    match user.timeout_remaining(now) {
        Some(left) => Err(ChatError::TimedOut(Remaining::from_millis(left))),
        None => Ok(()),
    }
}

pub struct ModerationEngine {
    store: Arc<dyn DocumentStore>,
    presence: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    users: Arc<DocumentCache<User>>,
    announce_admin_changes: bool,
}

impl ModerationEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        presence: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
        users: Arc<DocumentCache<User>>,
        announce_admin_changes: bool,
    ) -> Self {
        Self {
            store,
            presence,
            clock,
            users,
            announce_admin_changes,
        }
    }

    /// Current account of `id`, read from the store rather than the cache
    /// so authorization always sees the latest roles.
    async fn account(&self, id: &UserId) -> Result<User> {
        records::get::<User>(self.store.as_ref(), id.as_str())
            .await?
            .ok_or_else(|| ChatError::not_found("user", id.as_str()))
    }

    async fn actor_role(&self, actor: &UserId) -> Result<Role> {
        match records::get::<User>(self.store.as_ref(), actor.as_str()).await? {
            Some(user) => Ok(user.role()),
            None => Err(ChatError::AuthRequired),
        }
    }

    async fn require_admin(&self, actor: &UserId) -> Result<()> {
        if self.actor_role(actor).await? != Role::Admin {
            debug!(actor = %actor, "admin-only action refused");
            return Err(ChatError::permission("only admins can do that"));
        }
        Ok(())
    }

    /// Load both parties and check the hierarchy.
    async fn authorize_on(&self, actor: &UserId, target: &UserId) -> Result<User> {
        let actor_role = self.actor_role(actor).await?;
        let target_user = self.account(target).await?;
        if let Err(e) = authorize(actor_role, target_user.role()) {
            warn!(actor = %actor, target = %target, "moderation refused");
            return Err(e);
        }
        Ok(target_user)
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    /// Silence `target` for `minutes` and delete everything they posted.
    pub async fn timeout(&self, actor: &UserId, target: &UserId, minutes: u32) -> Result<CascadeReport> {
        let user = self.authorize_on(actor, target).await?;
        let until = self.clock.now_millis() + i64::from(minutes) * 60_000;

        self.store
            .update(constants::USERS, target.as_str(), json!({ "chatTimeoutUntil": until }))
            .await?;
        self.users.invalidate(target.as_str()).await;
        info!(actor = %actor, target = %target, username = %user.username, minutes, "user timed out");

        let mut report = CascadeReport::default();
        self.purge_content(target, &mut report).await;
        Ok(report)
    }

    pub async fn untimeout(&self, actor: &UserId, target: &UserId) -> Result<()> {
        self.authorize_on(actor, target).await?;
        self.store
            .update(constants::USERS, target.as_str(), json!({ "chatTimeoutUntil": null }))
            .await?;
        self.users.invalidate(target.as_str()).await;
        info!(actor = %actor, target = %target, "timeout lifted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bans
    // -----------------------------------------------------------------------

    /// Block the target's username for good, delete their content, their
    /// account and their presence record.
    ///
    /// The ban record is written first and must succeed; every later step
    /// is best-effort.
    pub async fn ban(&self, actor: &UserId, target: &UserId) -> Result<CascadeReport> {
        let user = self.authorize_on(actor, target).await?;
        let key = username_key(&user.username);

        let record = BannedUsername {
            username: key.clone(),
            banned_by: actor.clone(),
            banned_at: self.clock.now_millis(),
        };
        records::put(self.store.as_ref(), &key, &record).await?;
        info!(actor = %actor, target = %target, username = %key, "username banned");

        let mut report = CascadeReport::default();
        self.purge_content(target, &mut report).await;

        match self.store.delete(constants::USERS, target.as_str()).await {
            Ok(removed) => report.account_deleted = removed,
            Err(e) => {
                warn!(target = %target, error = %e, "failed to delete banned account");
                report.failures.push(format!("delete account: {e}"));
            }
        }
        self.users.invalidate(target.as_str()).await;

        match self.presence.remove(&presence_path(target.as_str())).await {
            Ok(()) => report.presence_cleared = true,
            Err(e) => {
                warn!(target = %target, error = %e, "failed to clear presence of banned user");
                report.failures.push(format!("clear presence: {e}"));
            }
        }

        Ok(report)
    }

    /// Lift a username ban. The deleted account is not restored.
    pub async fn unban(&self, actor: &UserId, username: &str) -> Result<bool> {
        if !self.actor_role(actor).await?.is_staff() {
            return Err(ChatError::permission("only moderators and admins can do that"));
        }
        let key = username_key(username);
        let removed = self.store.delete(constants::BANNED_USERNAMES, &key).await?;
        info!(actor = %actor, username = %key, removed, "username unbanned");
        Ok(removed)
    }

    pub async fn is_username_banned(&self, username: &str) -> Result<bool> {
        let key = username_key(username);
        Ok(records::get::<BannedUsername>(self.store.as_ref(), &key)
            .await?
            .is_some())
    }

    /// Delete every chat message and comment written by `target`.
    async fn purge_content(&self, target: &UserId, report: &mut CascadeReport) {
        let messages = self
            .delete_authored(constants::CHAT_MESSAGES, target, report)
            .await;
        let comments = self.delete_authored(constants::COMMENTS, target, report).await;
        report.messages_deleted = messages;
        report.comments_deleted = comments;
    }

    async fn delete_authored(&self, collection: &str, target: &UserId, report: &mut CascadeReport) -> usize {
        let query = Query::collection(collection).where_eq("userId", target.as_str());
        let docs = match self.store.query(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(collection, target = %target, error = %e, "cascade query failed");
                report.failures.push(format!("list {collection}: {e}"));
                return 0;
            }
        };

        let mut deleted = 0;
        for doc in docs {
            match self.store.delete(collection, &doc.id).await {
                Ok(true) => deleted += 1,
                // Someone else got there first.
                Ok(false) => {}
                Err(e) => {
                    warn!(collection, id = %doc.id, error = %e, "cascade delete failed, continuing");
                    report.failures.push(format!("delete {collection}/{}: {e}", doc.id));
                }
            }
        }
        debug!(collection, target = %target, deleted, "cascade step finished");
        deleted
    }

    // -----------------------------------------------------------------------
    // Admin progression edits
    // -----------------------------------------------------------------------

    /// Jump `target` to `level`, rewriting message count and points with it.
    pub async fn admin_change_level(&self, actor: &UserId, target: &UserId, level: u32) -> Result<Progress> {
        self.require_admin(actor).await?;
        let user = self.account(target).await?;
        let progress = Progress::for_level(level);
        self.write_progress(target, progress).await?;
        info!(actor = %actor, target = %target, level = progress.level, "level set by admin");

        if self.announce_admin_changes {
            self.announce_best_effort(format!(
                "{} is now level {} (set by an admin)",
                user.username, progress.level
            ))
            .await;
        }
        Ok(progress)
    }

    /// Add `delta` points (negative removes). Points are only ever stored
    /// as derived from the message count, so the result is rounded down to
    /// a whole grant. A delta too small to change the rounded total leaves
    /// the account untouched and is not announced.
    pub async fn admin_give_points(&self, actor: &UserId, target: &UserId, delta: i64) -> Result<Progress> {
        self.require_admin(actor).await?;
        let user = self.account(target).await?;
        let current = i64::try_from(user.points).unwrap_or(i64::MAX);
        let wanted = u64::try_from(current.saturating_add(delta).max(0)).unwrap_or(0);
        let progress = Progress::for_points(wanted);
        let applied = i64::try_from(progress.points)
            .unwrap_or(i64::MAX)
            .saturating_sub(current);
        if applied == 0 {
            debug!(actor = %actor, target = %target, delta, "point change rounds to nothing");
            return Ok(Progress::from_message_count(user.message_count));
        }

        self.write_progress(target, progress).await?;
        info!(actor = %actor, target = %target, delta, applied, points = progress.points, "points changed by admin");

        if self.announce_admin_changes {
            let verb = if applied > 0 { "received" } else { "lost" };
            self.announce_best_effort(format!(
                "{} {verb} {} points from an admin",
                user.username,
                applied.unsigned_abs()
            ))
            .await;
        }
        Ok(progress)
    }

    async fn write_progress(&self, target: &UserId, progress: Progress) -> Result<()> {
        self.store
            .update(
                constants::USERS,
                target.as_str(),
                json!({
                    "messageCount": progress.message_count,
                    "level": progress.level,
                    "points": progress.points,
                }),
            )
            .await?;
        self.users.invalidate(target.as_str()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Device bans
    // -----------------------------------------------------------------------

    pub async fn ban_device(&self, actor: &UserId, fingerprint: &str, username: &str) -> Result<()> {
        self.require_admin(actor).await?;
        let ban = DeviceBan {
            fingerprint: fingerprint.to_string(),
            banned_at: self.clock.now_millis(),
            banned_by: actor.clone(),
            username: username_key(username),
        };
        records::put(self.store.as_ref(), fingerprint, &ban).await?;
        info!(actor = %actor, fingerprint, "device banned");
        Ok(())
    }

    pub async fn unban_device(&self, actor: &UserId, fingerprint: &str) -> Result<bool> {
        self.require_admin(actor).await?;
        let removed = self.store.delete(constants::BANNED_DEVICES, fingerprint).await?;
        info!(actor = %actor, fingerprint, removed, "device unbanned");
        Ok(removed)
    }

    /// Ban every device `target` has been seen on. Returns how many bans
    /// were written.
    pub async fn ban_user_devices(&self, actor: &UserId, target: &UserId) -> Result<usize> {
        self.require_admin(actor).await?;
        let user = self.account(target).await?;
        let mut banned = 0;
        for fingerprint in &user.device_fingerprints {
            match self.ban_device(actor, fingerprint, &user.username).await {
                Ok(()) => banned += 1,
                Err(e) => warn!(fingerprint = %fingerprint, error = %e, "device ban failed, continuing"),
            }
        }
        Ok(banned)
    }

    /// Remember that `user` signed in from `fingerprint`.
    pub async fn record_device_fingerprint(&self, user: &UserId, fingerprint: &str) -> Result<()> {
        let mut account = self.account(user).await?;
        if account.device_fingerprints.iter().any(|f| f == fingerprint) {
            return Ok(());
        }
        account.device_fingerprints.push(fingerprint.to_string());
        self.store
            .update(
                constants::USERS,
                user.as_str(),
                json!({ "deviceFingerprints": account.device_fingerprints }),
            )
            .await?;
        Ok(())
    }

    pub async fn is_device_banned(&self, fingerprint: &str) -> Result<bool> {
        Ok(records::get::<DeviceBan>(self.store.as_ref(), fingerprint)
            .await?
            .is_some())
    }

    // -----------------------------------------------------------------------
    // Announcements
    // -----------------------------------------------------------------------

    /// Post a system message. Returns its id.
    pub async fn announce(&self, text: impl Into<String>) -> Result<String> {
        let message = ChatMessage::system(text, self.clock.now_millis());
        Ok(records::create(self.store.as_ref(), &message).await?)
    }

    async fn announce_best_effort(&self, text: String) {
        if let Err(e) = self.announce(text).await {
            warn!(error = %e, "failed to post announcement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lounge_shared::models::Comment;
    use lounge_shared::ManualClock;
    use lounge_store::{MemoryPresence, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        presence: Arc<MemoryPresence>,
        clock: Arc<ManualClock>,
        engine: ModerationEngine,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let presence = Arc::new(MemoryPresence::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let users = Arc::new(DocumentCache::new(store.clone(), 16));
        let engine = ModerationEngine::new(store.clone(), presence.clone(), clock.clone(), users, true);

        for (id, name, role) in [
            ("admin", "root", Role::Admin),
            ("mod", "keeper", Role::Mod),
            ("u1", "paint", Role::User),
            ("u2", "bob", Role::User),
        ] {
            records::put(store.as_ref(), id, &User::new(name, 0).with_role(role))
                .await
                .unwrap();
        }

        Fixture {
            store,
            presence,
            clock,
            engine,
        }
    }

    async fn post(store: &MemoryStore, user: &str, text: &str) -> String {
        let msg = ChatMessage {
            username: user.to_string(),
            user_id: UserId::new(user),
            text: text.to_string(),
            gif_id: None,
            timestamp: 1,
            is_system: false,
        };
        records::create(store, &msg).await.unwrap()
    }

    async fn comment(store: &MemoryStore, user: &str, thread: &str) {
        let c = Comment {
            thread_id: thread.to_string(),
            user_id: UserId::new(user),
            username: user.to_string(),
            text: "nice".to_string(),
            gif_id: None,
            timestamp: 1,
            parent_comment_id: None,
        };
        records::create(store, &c).await.unwrap();
    }

    #[test]
    fn test_authorize_hierarchy() {
        assert!(authorize(Role::Admin, Role::Admin).is_ok());
        assert!(authorize(Role::Mod, Role::User).is_ok());
        assert!(matches!(authorize(Role::Mod, Role::Mod), Err(ChatError::PermissionDenied(_))));
        assert!(matches!(authorize(Role::User, Role::User), Err(ChatError::PermissionDenied(_))));
    }

    #[test]
    fn test_check_timeout_reports_remaining() {
        let mut user = User::new("a", 0);
        user.chat_timeout_until = Some(10 * 60_000);
        match check_timeout(&user, 0) {
            Err(ChatError::TimedOut(left)) => assert_eq!(left.to_string(), "10m"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_timeout(&user, 10 * 60_000).is_ok());
    }

    #[tokio::test]
    async fn test_timeout_cascades_only_target_content() {
        let f = fixture().await;
        post(&f.store, "u1", "a").await;
        post(&f.store, "u1", "b").await;
        post(&f.store, "u2", "c").await;
        comment(&f.store, "u1", "review-1").await;
        comment(&f.store, "u1", "blog-7").await;
        comment(&f.store, "u2", "review-1").await;

        let report = f
            .engine
            .timeout(&UserId::new("mod"), &UserId::new("u1"), 30)
            .await
            .unwrap();

        assert_eq!(report.messages_deleted, 2);
        assert_eq!(report.comments_deleted, 2);
        assert_eq!(f.store.count(constants::CHAT_MESSAGES).await, 1);
        assert_eq!(f.store.count(constants::COMMENTS).await, 1);

        let user: User = records::require(f.store.as_ref(), "u1").await.unwrap();
        assert_eq!(user.chat_timeout_until, Some(1_000_000 + 30 * 60_000));

        f.clock.advance(30 * 60_000);
        assert!(check_timeout(&user, f.clock.now_millis()).is_ok());
    }

    #[tokio::test]
    async fn test_mod_cannot_ban_admin_but_admin_can_ban_mod() {
        let f = fixture().await;
        let err = f
            .engine
            .ban(&UserId::new("mod"), &UserId::new("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));

        let report = f
            .engine
            .ban(&UserId::new("admin"), &UserId::new("mod"))
            .await
            .unwrap();
        assert!(report.account_deleted);
        assert!(f.engine.is_username_banned("KEEPER").await.unwrap());
    }

    #[tokio::test]
    async fn test_ban_continues_past_failed_step() {
        let f = fixture().await;
        let first = post(&f.store, "u1", "one").await;
        post(&f.store, "u1", "two").await;
        f.presence
            .set(&presence_path("u1"), json!({ "username": "paint", "lastActive": 1 }))
            .await
            .unwrap();
        f.store.fail_writes_to(constants::CHAT_MESSAGES, &first).await;

        let report = f
            .engine
            .ban(&UserId::new("admin"), &UserId::new("u1"))
            .await
            .unwrap();

        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_complete());
        assert!(report.account_deleted);
        assert!(report.presence_cleared);
        assert!(f.presence.get(&presence_path("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unban_removes_record() {
        let f = fixture().await;
        f.engine
            .ban(&UserId::new("admin"), &UserId::new("u1"))
            .await
            .unwrap();
        assert!(f.engine.unban(&UserId::new("mod"), "Paint").await.unwrap());
        assert!(!f.engine.is_username_banned("paint").await.unwrap());
        // The account stays gone.
        assert!(f.store.get(constants::USERS, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_admin_change_level_keeps_fields_consistent() {
        let f = fixture().await;
        let progress = f
            .engine
            .admin_change_level(&UserId::new("admin"), &UserId::new("u2"), 5)
            .await
            .unwrap();
        assert_eq!(progress.message_count, 400);

        let user: User = records::require(f.store.as_ref(), "u2").await.unwrap();
        assert_eq!((user.message_count, user.level, user.points), (400, 5, 200));
        // One announcement.
        assert_eq!(f.store.count(constants::CHAT_MESSAGES).await, 1);
    }

    #[tokio::test]
    async fn test_mods_cannot_edit_progression() {
        let f = fixture().await;
        let err = f
            .engine
            .admin_give_points(&UserId::new("mod"), &UserId::new("u2"), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_admin_give_points() {
        let f = fixture().await;
        let progress = f
            .engine
            .admin_give_points(&UserId::new("admin"), &UserId::new("u2"), 60)
            .await
            .unwrap();
        assert_eq!(progress.points, 50);
        assert_eq!(progress.message_count, 100);

        let progress = f
            .engine
            .admin_give_points(&UserId::new("admin"), &UserId::new("u2"), -500)
            .await
            .unwrap();
        assert_eq!(progress, Progress::from_message_count(0));
    }

    #[tokio::test]
    async fn test_point_grant_announces_what_was_applied() {
        let f = fixture().await;
        let admin = UserId::new("admin");
        let bob = UserId::new("u2");

        // Too small to reach a whole grant.
        let progress = f.engine.admin_give_points(&admin, &bob, 10).await.unwrap();
        assert_eq!(progress.points, 0);
        assert_eq!(f.store.count(constants::CHAT_MESSAGES).await, 0);

        f.engine.admin_give_points(&admin, &bob, 60).await.unwrap();
        let announced: Vec<String> =
            records::query::<ChatMessage>(f.store.as_ref(), &Query::collection(constants::CHAT_MESSAGES))
                .await
                .unwrap()
                .into_iter()
                .map(|e| e.record.text)
                .collect();
        assert_eq!(announced, vec!["bob received 50 points from an admin".to_string()]);
    }

    #[tokio::test]
    async fn test_point_grant_below_a_step_keeps_message_count() {
        let f = fixture().await;
        let admin = UserId::new("admin");
        let bob = UserId::new("u2");
        f.store
            .update(constants::USERS, "u2", json!({ "messageCount": 99, "points": 25 }))
            .await
            .unwrap();

        let progress = f.engine.admin_give_points(&admin, &bob, 10).await.unwrap();
        assert_eq!(progress.message_count, 99);

        let user: User = records::require(f.store.as_ref(), "u2").await.unwrap();
        assert_eq!(user.message_count, 99);
    }

    #[tokio::test]
    async fn test_device_bans() {
        let f = fixture().await;
        let admin = UserId::new("admin");
        let u1 = UserId::new("u1");
        f.engine.record_device_fingerprint(&u1, "fp-a").await.unwrap();
        f.engine.record_device_fingerprint(&u1, "fp-b").await.unwrap();
        f.engine.record_device_fingerprint(&u1, "fp-a").await.unwrap();

        assert_eq!(f.engine.ban_user_devices(&admin, &u1).await.unwrap(), 2);
        assert!(f.engine.is_device_banned("fp-b").await.unwrap());

        assert!(f.engine.unban_device(&admin, "fp-b").await.unwrap());
        assert!(!f.engine.is_device_banned("fp-b").await.unwrap());

        let err = f
            .engine
            .ban_device(&UserId::new("mod"), "fp-c", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
    }
}
