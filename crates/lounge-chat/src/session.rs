//! The per-client chat session.
//!
//! A [`ChatSessionController`] owns one client's view of the chat: its
//! connection state, the live message and presence feeds, the heartbeat
//! and the send pipeline. Feed and timer tasks hold only a weak handle to
//! the session, so dropping the last controller handle stops them.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use lounge_shared::constants::{self, presence_path};
use lounge_shared::filter::{censor_slurs, contains_link, contains_slur};
use lounge_shared::models::{ChatMessage, Comment, ItemKind, PresenceRecord, ShopItem, User};
use lounge_shared::{Clock, UserId};
use lounge_store::records::{self, Entry};
use lounge_store::{
    subscribe, watch_document, watch_path, DocSnapshot, DocumentStore, Direction, IdentityProvider,
    PresenceStore, Query,
};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::accounts::AccountService;
use crate::cache::DocumentCache;
use crate::config::ChatConfig;
use crate::error::{ChatError, ContentRejection, Result};
use crate::events::{AuthorView, ConnectionState, RenderedMessage, SessionEvent};
use crate::moderation::{check_timeout, CascadeReport, ModerationEngine};
use crate::presence::{self, parse_records, PresenceTracker, Viewer};
use crate::spam::SpamGuard;

const EVENT_CAPACITY: usize = 256;

/// The collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn DocumentStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
}

/// Which messages have already been shown.
#[derive(Default)]
struct FeedState {
    seen: HashSet<String>,
    history_loaded: bool,
}

struct SessionState {
    connection: ConnectionState,
    connection_id: String,
    viewer: Option<Viewer>,
    device: Option<String>,
    pending_gif: Option<String>,
    feed: FeedState,
    tasks: Vec<JoinHandle<()>>,
    identity_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            connection_id: String::new(),
            viewer: None,
            device: None,
            pending_gif: None,
            feed: FeedState::default(),
            tasks: Vec::new(),
            identity_task: None,
        }
    }
}

struct Inner {
    config: ChatConfig,
    store: Arc<dyn DocumentStore>,
    presence: Arc<dyn PresenceStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    users: Arc<DocumentCache<User>>,
    items: DocumentCache<ShopItem>,
    spam: SpamGuard,
    tracker: PresenceTracker,
    moderation: ModerationEngine,
    accounts: AccountService,
    events: broadcast::Sender<SessionEvent>,
    session: Mutex<SessionState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        for task in session.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = session.identity_task.take() {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct ChatSessionController {
    inner: Arc<Inner>,
}

impl ChatSessionController {
    pub fn new(deps: SessionDeps, config: ChatConfig) -> Self {
        let users = Arc::new(DocumentCache::new(deps.store.clone(), config.user_cache_capacity));
        let items = DocumentCache::new(deps.store.clone(), config.user_cache_capacity);
        let tracker = PresenceTracker::new(
            config.inactive_threshold_ms,
            config.presence_debounce(),
            users.clone(),
        );
        let moderation = ModerationEngine::new(
            deps.store.clone(),
            deps.presence.clone(),
            deps.clock.clone(),
            users.clone(),
            config.announce_admin_changes,
        );
        let accounts = AccountService::new(deps.store.clone(), deps.clock.clone(), users.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                spam: SpamGuard::new(config.spam.clone()),
                config,
                store: deps.store,
                presence: deps.presence,
                identity: deps.identity,
                clock: deps.clock,
                users,
                items,
                tracker,
                moderation,
                accounts,
                events,
                session: Mutex::new(SessionState::new()),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// UI-facing event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn accounts(&self) -> &AccountService {
        &self.inner.accounts
    }

    pub fn moderation(&self) -> &ModerationEngine {
        &self.inner.moderation
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.session.lock().await.connection
    }

    pub async fn viewer(&self) -> Option<Viewer> {
        self.inner.session.lock().await.viewer.clone()
    }

    /// Id under which this client's disconnect hooks are registered.
    pub async fn connection_id(&self) -> String {
        self.inner.session.lock().await.connection_id.clone()
    }

    fn emit(&self, event: SessionEvent) {
        trace!(?event, "session event");
        // No UI attached is fine.
        let _ = self.inner.events.send(event);
    }

    async fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut session = self.inner.session.lock().await;
            let changed = session.connection != next;
            session.connection = next;
            changed
        };
        if changed {
            info!(state = ?next, "connection state changed");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the connection to the backing stores. No-op when already
    /// connected.
    pub async fn connect(&self) {
        if self.state().await != ConnectionState::Disconnected {
            return;
        }
        self.set_state(ConnectionState::Connecting).await;
        self.inner.session.lock().await.connection_id = Uuid::new_v4().to_string();
        self.set_state(ConnectionState::Connected).await;
    }

    /// Fingerprint of the device this session runs on, checked against
    /// device bans at sign-in.
    pub async fn set_device(&self, fingerprint: impl Into<String>) {
        self.inner.session.lock().await.device = Some(fingerprint.into());
    }

    /// Follow the identity collaborator: sign in whenever it reports a
    /// user and log out when it reports none.
    pub async fn follow_identity(&self) {
        let mut auth = self.inner.identity.auth_state();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                let current = auth.borrow_and_update().clone();
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                let result = match current {
                    Some(user_id) => session.authenticate(user_id).await,
                    None => session.logout().await,
                };
                if let Err(e) = result {
                    warn!(error = %e, "auth state change failed");
                    session.emit(SessionEvent::Notice(e.to_string()));
                }
                drop(session);

                if auth.changed().await.is_err() {
                    break;
                }
            }
        });

        let previous = self.inner.session.lock().await.identity_task.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Sign `user_id` in: check bans, publish presence, start the feeds
    /// and the heartbeat.
    pub async fn authenticate(&self, user_id: UserId) -> Result<()> {
        self.connect().await;

        let (current, device) = {
            let session = self.inner.session.lock().await;
            (session.viewer.clone(), session.device.clone())
        };
        match current {
            Some(viewer) if viewer.user_id == user_id => return Ok(()),
            Some(_) => self.logout().await?,
            None => {}
        }

        let moderation = &self.inner.moderation;
        if let Some(fingerprint) = &device {
            if moderation.is_device_banned(fingerprint).await? {
                warn!(user = %user_id, "sign-in refused: device banned");
                return Err(ChatError::DeviceBanned);
            }
        }

        let user = records::get::<User>(self.inner.store.as_ref(), user_id.as_str())
            .await?
            .ok_or_else(|| ChatError::not_found("user", user_id.as_str()))?;
        if moderation.is_username_banned(&user.username).await? {
            warn!(user = %user_id, "sign-in refused: username banned");
            return Err(ChatError::Banned);
        }
        if let Some(fingerprint) = &device {
            if let Err(e) = moderation.record_device_fingerprint(&user_id, fingerprint).await {
                warn!(user = %user_id, error = %e, "failed to record device");
            }
        }

        self.inner.users.insert(user_id.as_str(), user.clone()).await;
        let viewer = Viewer {
            user_id: user_id.clone(),
            username: user.username.clone(),
        };
        let connection_id = self.connection_id().await;
        let path = presence_path(user_id.as_str());
        self.publish_presence(&viewer, self.inner.clock.now_millis())
            .await?;
        self.inner
            .presence
            .on_disconnect_remove(&connection_id, &path)
            .await?;

        {
            let mut session = self.inner.session.lock().await;
            session.viewer = Some(viewer);
            session.feed = FeedState::default();
            session.pending_gif = None;
        }
        let tasks = vec![
            self.spawn_message_feed(),
            self.spawn_presence_feed(),
            self.spawn_account_feed(&user_id),
            self.spawn_heartbeat(),
        ];
        self.inner.session.lock().await.tasks.extend(tasks);

        self.set_state(ConnectionState::Authenticated).await;
        info!(user = %user_id, username = %user.username, "signed in");
        Ok(())
    }

    /// Leave the chat: remove our presence record, stop feeds and timers
    /// and drop the join caches. The connection stays open.
    pub async fn logout(&self) -> Result<()> {
        let (viewer, tasks, connection_id) = {
            let mut session = self.inner.session.lock().await;
            session.pending_gif = None;
            session.feed = FeedState::default();
            (
                session.viewer.take(),
                std::mem::take(&mut session.tasks),
                session.connection_id.clone(),
            )
        };
        for task in tasks {
            task.abort();
        }
        self.inner.tracker.reset();
        self.inner.users.clear().await;
        self.inner.items.clear().await;

        if let Some(viewer) = viewer {
            let path = presence_path(viewer.user_id.as_str());
            if let Err(e) = self
                .inner
                .presence
                .cancel_on_disconnect(&connection_id, &path)
                .await
            {
                warn!(error = %e, "failed to cancel disconnect hook");
            }
            self.inner.spam.reset(&viewer.user_id).await;
            self.inner.presence.remove(&path).await?;
            info!(user = %viewer.user_id, "signed out");
        }

        if self.state().await == ConnectionState::Authenticated {
            self.set_state(ConnectionState::Connected).await;
        }
        Ok(())
    }

    /// Close the session entirely.
    pub async fn disconnect(&self) {
        let identity_task = self.inner.session.lock().await.identity_task.take();
        if let Some(task) = identity_task {
            task.abort();
        }
        if let Err(e) = self.logout().await {
            warn!(error = %e, "logout during disconnect failed");
        }
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// The page went to the background. Disconnect hooks are not prompt,
    /// so the presence record is removed right away; the next heartbeat
    /// restores it.
    pub async fn page_hidden(&self) -> Result<()> {
        if let Some(viewer) = self.viewer().await {
            self.inner
                .presence
                .remove(&presence_path(viewer.user_id.as_str()))
                .await?;
        }
        Ok(())
    }

    /// Refresh our presence record and expire idle spam windows.
    pub async fn heartbeat(&self) -> Result<()> {
        let Some(viewer) = self.viewer().await else {
            return Ok(());
        };
        let now = self.inner.clock.now_millis();
        self.publish_presence(&viewer, now).await?;
        self.inner.spam.purge_stale(now).await;
        trace!(user = %viewer.user_id, "heartbeat");
        Ok(())
    }

    async fn publish_presence(&self, viewer: &Viewer, now: i64) -> Result<()> {
        let record = PresenceRecord {
            username: viewer.username.clone(),
            last_active: now,
        };
        let value = serde_json::to_value(&record)
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        self.inner
            .presence
            .set(&presence_path(viewer.user_id.as_str()), value)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn spawn_message_feed(&self) -> JoinHandle<()> {
        let query = Query::collection(constants::CHAT_MESSAGES)
            .order_by("timestamp", Direction::Desc)
            .limit(self.inner.config.message_feed_limit);
        let mut feed = subscribe(self.inner.store.clone(), query);
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(docs) = feed.next().await {
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                session.handle_message_snapshot(docs).await;
            }
        })
    }

    fn spawn_presence_feed(&self) -> JoinHandle<()> {
        let mut feed = watch_path(self.inner.presence.clone(), constants::PRESENCE_ROOT);
        let debounce = self.inner.tracker.debounce();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(mut tree) = feed.next().await {
                tokio::time::sleep(debounce).await;
                while let Some(newer) = feed.try_next() {
                    tree = newer;
                }
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                session.handle_presence_snapshot(tree).await;
            }
        })
    }

    fn spawn_account_feed(&self, user_id: &UserId) -> JoinHandle<()> {
        let mut feed = watch_document(self.inner.store.clone(), constants::USERS, user_id.as_str());
        let weak = Arc::downgrade(&self.inner);
        let user_id = user_id.clone();

        // Sign-in has already read the account, so a missing document here
        // means it was deleted since.
        tokio::spawn(async move {
            while let Some(doc) = feed.next().await {
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                match doc {
                    Some(value) => match serde_json::from_value::<User>(value) {
                        Ok(user) => session.on_own_account(&user_id, user).await,
                        Err(e) => warn!(user = %user_id, error = %e, "unreadable account document"),
                    },
                    None => {
                        session.on_account_removed(&user_id);
                        break;
                    }
                }
            }
        })
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let period = self.inner.config.heartbeat_interval();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(session) = Self::from_weak(&weak) else {
                    break;
                };
                if let Err(e) = session.heartbeat().await {
                    warn!(error = %e, "heartbeat failed");
                }
            }
        })
    }

    async fn on_own_account(&self, user_id: &UserId, user: User) {
        self.inner.users.insert(user_id.as_str(), user.clone()).await;
        let mut session = self.inner.session.lock().await;
        if let Some(viewer) = session.viewer.as_mut() {
            if viewer.user_id == *user_id && viewer.username != user.username {
                debug!(user = %user_id, username = %user.username, "own username changed");
                viewer.username = user.username;
            }
        }
    }

    /// Our account was deleted underneath us (a ban). Logging out aborts
    /// the feed task calling this, so it runs on its own task.
    fn on_account_removed(&self, user_id: &UserId) {
        warn!(user = %user_id, "own account removed, signing out");
        self.emit(SessionEvent::Notice("Your account has been removed".to_string()));
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.logout().await {
                warn!(error = %e, "logout after account removal failed");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Feed handling
    // -----------------------------------------------------------------------

    /// Render what is new in a message-feed snapshot. The first snapshot
    /// after sign-in is the history burst; later ones only append unseen
    /// messages.
    pub async fn handle_message_snapshot(&self, docs: Vec<DocSnapshot>) {
        let mut entries = records::decode_all::<ChatMessage>(docs);
        entries.sort_by(|a, b| {
            a.record
                .timestamp
                .cmp(&b.record.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });

        let (fresh, initial) = {
            let mut session = self.inner.session.lock().await;
            if session.viewer.is_none() {
                return;
            }
            let feed = &mut session.feed;
            if !feed.history_loaded {
                feed.history_loaded = true;
                feed.seen.extend(entries.iter().map(|e| e.id.clone()));
                (entries, true)
            } else {
                // Sender clocks differ, so a new message may carry an older
                // timestamp than what is already on screen.
                let fresh: Vec<_> = entries
                    .into_iter()
                    .filter(|e| feed.seen.insert(e.id.clone()))
                    .collect();
                (fresh, false)
            }
        };

        if initial {
            debug!(count = fresh.len(), "message history loaded");
            let rendered = self.render(fresh).await;
            self.emit(SessionEvent::HistoryLoaded(rendered));
        } else if !fresh.is_empty() {
            debug!(count = fresh.len(), "new messages");
            let rendered = self.render(fresh).await;
            self.emit(SessionEvent::MessagesAppended(rendered));
        }
    }

    /// Join messages to their authors and GIFs. All lookups for a batch run
    /// concurrently and go through the caches.
    async fn render(&self, entries: Vec<Entry<ChatMessage>>) -> Vec<RenderedMessage> {
        let author_ids: Vec<&str> = entries
            .iter()
            .filter(|e| !e.record.is_system)
            .map(|e| e.record.user_id.as_str())
            .collect();
        let gif_ids: Vec<&str> = entries
            .iter()
            .filter_map(|e| e.record.gif_id.as_deref())
            .collect();

        let (authors, gifs) = tokio::join!(
            self.inner.users.get_many(author_ids),
            self.inner.items.get_many(gif_ids),
        );

        entries
            .into_iter()
            .map(|Entry { id, record }| {
                let author = if record.is_system {
                    None
                } else {
                    authors.get(record.user_id.as_str()).map(AuthorView::from)
                };
                let gif = record
                    .gif_id
                    .as_deref()
                    .and_then(|g| gifs.get(g))
                    .filter(|item| item.kind == ItemKind::Gif)
                    .cloned();
                let mut message = record;
                if !message.is_system {
                    // Other clients may not run the same send checks.
                    message.text = censor_slurs(&message.text);
                }
                RenderedMessage {
                    id,
                    message,
                    author,
                    gif,
                }
            })
            .collect()
    }

    /// Rebuild the online list from a presence-tree snapshot.
    pub async fn handle_presence_snapshot(&self, tree: Option<Value>) {
        let records = parse_records(tree.as_ref());
        let viewer = self.viewer().await;
        let now = self.inner.clock.now_millis();
        if let Some(online) = self.inner.tracker.rebuild(records, now, viewer.as_ref()).await {
            debug!(online = online.len(), "presence rebuilt");
            self.emit(SessionEvent::PresenceChanged(online));
        }
    }

    /// Distinct usernames currently online.
    pub async fn online_count(&self) -> Result<usize> {
        let tree = self.inner.presence.get(constants::PRESENCE_ROOT).await?;
        let records = parse_records(tree.as_ref());
        Ok(presence::online_count(
            &records,
            self.inner.clock.now_millis(),
            self.inner.tracker.threshold_ms(),
        ))
    }

    // -----------------------------------------------------------------------
    // Posting
    // -----------------------------------------------------------------------

    /// The signed-in user, freshly read, if they may post right now.
    async fn poster(&self, now: i64) -> Result<(Viewer, User)> {
        let viewer = self.viewer().await.ok_or(ChatError::AuthRequired)?;
        let user = records::get::<User>(self.inner.store.as_ref(), viewer.user_id.as_str())
            .await?
            .ok_or(ChatError::AuthRequired)?;
        check_timeout(&user, now)?;
        if self.inner.moderation.is_username_banned(&user.username).await? {
            return Err(ChatError::Banned);
        }
        Ok((viewer, user))
    }

    async fn validate_gif(&self, user: &User, gif_id: &str) -> Result<ShopItem> {
        match self.inner.items.get(gif_id).await? {
            Some(item) if item.kind == ItemKind::Gif && user.owns(gif_id) => Ok(item),
            _ => Err(ChatError::InvalidAttachment),
        }
    }

    /// Pick a GIF to attach to the next message.
    pub async fn select_gif(&self, gif_id: &str) -> Result<ShopItem> {
        let viewer = self.viewer().await.ok_or(ChatError::AuthRequired)?;
        let user = records::get::<User>(self.inner.store.as_ref(), viewer.user_id.as_str())
            .await?
            .ok_or(ChatError::AuthRequired)?;
        let item = self.validate_gif(&user, gif_id).await?;
        self.inner.session.lock().await.pending_gif = Some(gif_id.to_string());
        Ok(item)
    }

    pub async fn clear_gif(&self) {
        self.inner.session.lock().await.pending_gif = None;
    }

    /// Send a chat message. `gif_id` overrides any GIF chosen with
    /// [`select_gif`](Self::select_gif). Returns the new message id.
    ///
    /// Checks run in order and stop at the first refusal; nothing is written
    /// unless every check passes. After the message is stored, the sender's
    /// progression and presence are updated best-effort.
    pub async fn send_message(&self, text: &str, gif_id: Option<&str>) -> Result<String> {
        let now = self.inner.clock.now_millis();
        let (viewer, user) = self.poster(now).await?;

        let text = text.trim();
        let gif = match gif_id {
            Some(id) => Some(id.to_string()),
            None => self.inner.session.lock().await.pending_gif.clone(),
        };
        if text.is_empty() && gif.is_none() {
            return Err(ChatError::EmptyInput);
        }

        if !text.is_empty() {
            if contains_slur(text) {
                debug!(user = %viewer.user_id, "send refused: slur");
                return Err(ChatError::ContentRejected(ContentRejection::Slur));
            }
            if contains_link(text) {
                debug!(user = %viewer.user_id, "send refused: link");
                return Err(ChatError::ContentRejected(ContentRejection::Link));
            }
        }

        self.inner
            .spam
            .check(&viewer.user_id, text, now)
            .await
            .map_err(ChatError::RateLimited)?;

        if let Some(id) = &gif {
            if let Err(e) = self.validate_gif(&user, id).await {
                debug!(user = %viewer.user_id, gif = %id, "send refused: invalid gif");
                self.clear_gif().await;
                return Err(e);
            }
        }

        let message = ChatMessage {
            username: user.username.clone(),
            user_id: viewer.user_id.clone(),
            text: text.to_string(),
            gif_id: gif,
            timestamp: now,
            is_system: false,
        };
        let id = records::create(self.inner.store.as_ref(), &message).await?;
        self.inner.spam.record(&viewer.user_id, text, now).await;
        self.clear_gif().await;
        debug!(user = %viewer.user_id, id = %id, "message sent");

        if let Err(e) = self.count_message(&viewer.user_id, &user).await {
            warn!(user = %viewer.user_id, error = %e, "failed to update progression");
        }
        if let Err(e) = self.publish_presence(&viewer, now).await {
            warn!(user = %viewer.user_id, error = %e, "failed to refresh presence");
        }

        Ok(id)
    }

    /// Credit one message to `before`'s account and announce a level-up.
    async fn count_message(&self, user_id: &UserId, before: &User) -> Result<()> {
        let prior = before.progress();
        let next = prior.next();
        self.inner
            .store
            .update(
                constants::USERS,
                user_id.as_str(),
                serde_json::json!({
                    "messageCount": next.message_count,
                    "level": next.level,
                    "points": next.points,
                }),
            )
            .await?;

        let mut updated = before.clone();
        updated.message_count = next.message_count;
        updated.level = next.level;
        updated.points = next.points;
        self.inner.users.insert(user_id.as_str(), updated).await;

        if next.level > prior.level {
            info!(user = %user_id, level = next.level, "level up");
            self.inner
                .moderation
                .announce(format!("🎉 {} reached level {}!", before.username, next.level))
                .await?;
            self.emit(SessionEvent::LevelUp { level: next.level });
        }
        Ok(())
    }

    /// Comment on a thread, or reply to a top-level comment in it.
    pub async fn post_comment(
        &self,
        thread_id: &str,
        text: &str,
        parent_comment_id: Option<&str>,
    ) -> Result<String> {
        let now = self.inner.clock.now_millis();
        let (viewer, user) = self.poster(now).await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        if contains_slur(text) {
            return Err(ChatError::ContentRejected(ContentRejection::Slur));
        }

        if let Some(parent_id) = parent_comment_id {
            let parent = records::get::<Comment>(self.inner.store.as_ref(), parent_id)
                .await?
                .ok_or(ChatError::InvalidReply)?;
            if parent.thread_id != thread_id || parent.is_reply() {
                return Err(ChatError::InvalidReply);
            }
        }

        let comment = Comment {
            thread_id: thread_id.to_string(),
            user_id: viewer.user_id.clone(),
            username: user.username,
            text: text.to_string(),
            gif_id: None,
            timestamp: now,
            parent_comment_id: parent_comment_id.map(str::to_string),
        };
        let id = records::create(self.inner.store.as_ref(), &comment).await?;
        debug!(user = %viewer.user_id, thread = thread_id, id = %id, "comment posted");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Moderation, acting as the signed-in user
    // -----------------------------------------------------------------------

    async fn actor(&self) -> Result<UserId> {
        self.viewer()
            .await
            .map(|v| v.user_id)
            .ok_or(ChatError::AuthRequired)
    }

    pub async fn timeout_user(&self, target: &UserId, minutes: u32) -> Result<CascadeReport> {
        let actor = self.actor().await?;
        self.inner.moderation.timeout(&actor, target, minutes).await
    }

    pub async fn untimeout_user(&self, target: &UserId) -> Result<()> {
        let actor = self.actor().await?;
        self.inner.moderation.untimeout(&actor, target).await
    }

    pub async fn ban_user(&self, target: &UserId) -> Result<CascadeReport> {
        let actor = self.actor().await?;
        self.inner.moderation.ban(&actor, target).await
    }

    pub async fn unban_username(&self, username: &str) -> Result<bool> {
        let actor = self.actor().await?;
        self.inner.moderation.unban(&actor, username).await
    }

    pub async fn admin_change_level(&self, target: &UserId, level: u32) -> Result<()> {
        let actor = self.actor().await?;
        self.inner
            .moderation
            .admin_change_level(&actor, target, level)
            .await
            .map(|_| ())
    }

    pub async fn admin_give_points(&self, target: &UserId, delta: i64) -> Result<()> {
        let actor = self.actor().await?;
        self.inner
            .moderation
            .admin_give_points(&actor, target, delta)
            .await
            .map(|_| ())
    }

    pub async fn ban_device(&self, fingerprint: &str, username: &str) -> Result<()> {
        let actor = self.actor().await?;
        self.inner.moderation.ban_device(&actor, fingerprint, username).await
    }

    pub async fn unban_device(&self, fingerprint: &str) -> Result<bool> {
        let actor = self.actor().await?;
        self.inner.moderation.unban_device(&actor, fingerprint).await
    }

    pub async fn ban_user_devices(&self, target: &UserId) -> Result<usize> {
        let actor = self.actor().await?;
        self.inner.moderation.ban_user_devices(&actor, target).await
    }
}
