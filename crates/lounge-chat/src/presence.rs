//! Who is online, derived from the presence tree.
//!
//! Each push from the presence feed is the whole tree. The tracker keeps
//! the freshest record per username, forces the viewer in, joins the
//! survivors to their accounts and sorts the result for display.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lounge_shared::models::{PresenceRecord, User};
use lounge_shared::username::username_key;
use lounge_shared::{Role, UserId};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::cache::DocumentCache;
use crate::events::OnlineUser;

/// The signed-in user looking at the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
    pub username: String,
}

/// The freshest record for one username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEntry {
    pub user_id: UserId,
    pub username: String,
    pub last_active: i64,
}

/// Decode the children of the presence root. Malformed entries are skipped.
pub fn parse_records(tree: Option<&Value>) -> Vec<(UserId, PresenceRecord)> {
    let Some(Value::Object(children)) = tree else {
        return Vec::new();
    };
    children
        .iter()
        .filter_map(|(id, value)| match serde_json::from_value::<PresenceRecord>(value.clone()) {
            Ok(record) => Some((UserId::new(id.clone()), record)),
            Err(e) => {
                trace!(id = %id, error = %e, "ignoring malformed presence record");
                None
            }
        })
        .collect()
}

/// Collapse `records` to one entry per lowercased username, keeping the
/// most recent fresh record, then force the viewer in.
pub fn reconcile(
    records: &[(UserId, PresenceRecord)],
    now: i64,
    threshold_ms: i64,
    viewer: Option<&Viewer>,
) -> BTreeMap<String, ActiveEntry> {
    let mut best: BTreeMap<String, ActiveEntry> = BTreeMap::new();

    for (user_id, record) in records {
        if !record.is_fresh(now, threshold_ms) {
            continue;
        }
        let key = username_key(&record.username);
        if key.is_empty() {
            continue;
        }
        let newer = best
            .get(&key)
            .map(|current| record.last_active > current.last_active)
            .unwrap_or(true);
        if newer {
            best.insert(
                key.clone(),
                ActiveEntry {
                    user_id: user_id.clone(),
                    username: key,
                    last_active: record.last_active,
                },
            );
        }
    }

    // Our own heartbeat may not have reached the feed yet.
    if let Some(viewer) = viewer {
        let key = username_key(&viewer.username);
        best.entry(key.clone()).or_insert_with(|| ActiveEntry {
            user_id: viewer.user_id.clone(),
            username: key,
            last_active: now,
        });
    }

    best
}

/// Distinct usernames with a fresh record.
pub fn online_count(records: &[(UserId, PresenceRecord)], now: i64, threshold_ms: i64) -> usize {
    records
        .iter()
        .filter(|(_, r)| r.is_fresh(now, threshold_ms))
        .map(|(_, r)| username_key(&r.username))
        .filter(|name| !name.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

/// Level descending, then username ascending.
pub fn sort_online(users: &mut [OnlineUser]) {
    users.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.username.cmp(&b.username)));
}

#[derive(Default)]
struct RebuildState {
    rebuilding: bool,
    queued: Option<(Vec<(UserId, PresenceRecord)>, i64)>,
    /// Bumped by `reset`, so a rebuild started before it cannot clear state
    /// that belongs to a later one.
    generation: u64,
}

/// Releases the in-progress flag when a rebuild future is dropped before
/// it completes, e.g. when its feed task is aborted on logout.
struct RebuildGuard<'a> {
    state: &'a Mutex<RebuildState>,
    generation: u64,
    armed: bool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == self.generation {
            debug!("presence rebuild cancelled");
            state.rebuilding = false;
            state.queued = None;
        }
    }
}

pub struct PresenceTracker {
    threshold_ms: i64,
    debounce: Duration,
    users: Arc<DocumentCache<User>>,
    state: Mutex<RebuildState>,
}

impl PresenceTracker {
    pub fn new(threshold_ms: i64, debounce: Duration, users: Arc<DocumentCache<User>>) -> Self {
        Self {
            threshold_ms,
            debounce,
            users,
            state: Mutex::new(RebuildState::default()),
        }
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Quiet period used to coalesce bursts of presence pushes.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Turn a presence snapshot into the sorted online list.
    ///
    /// If another rebuild is running, the snapshot is queued (replacing any
    /// earlier queued one) and `None` is returned; the running rebuild picks
    /// it up before it finishes and returns the list for the latest input.
    pub async fn rebuild(
        &self,
        records: Vec<(UserId, PresenceRecord)>,
        now: i64,
        viewer: Option<&Viewer>,
    ) -> Option<Vec<OnlineUser>> {
        let generation = {
            let mut state = self.lock_state()?;
            if state.rebuilding {
                debug!("presence rebuild in progress, queueing snapshot");
                state.queued = Some((records, now));
                return None;
            }
            state.rebuilding = true;
            state.generation
        };
        let mut guard = RebuildGuard {
            state: &self.state,
            generation,
            armed: true,
        };

        let mut input = (records, now);
        loop {
            let list = self.build(&input.0, input.1, viewer).await;

            let Some(mut state) = self.lock_state() else {
                return Some(list);
            };
            if state.generation != generation {
                guard.armed = false;
                return Some(list);
            }
            match state.queued.take() {
                Some(next) => input = next,
                None => {
                    state.rebuilding = false;
                    guard.armed = false;
                    return Some(list);
                }
            }
        }
    }

    /// Forget any rebuild in flight and any queued snapshot.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation = state.generation.wrapping_add(1);
        state.rebuilding = false;
        state.queued = None;
    }

    async fn build(
        &self,
        records: &[(UserId, PresenceRecord)],
        now: i64,
        viewer: Option<&Viewer>,
    ) -> Vec<OnlineUser> {
        let active = reconcile(records, now, self.threshold_ms, viewer);
        let accounts = self
            .users
            .get_many(active.values().map(|e| e.user_id.as_str()))
            .await;

        let mut online: Vec<OnlineUser> = active
            .into_values()
            .map(|entry| {
                let account = accounts.get(entry.user_id.as_str());
                OnlineUser {
                    role: account.map(User::role).unwrap_or(Role::User),
                    level: account.map(|u| u.level).unwrap_or(1),
                    badge: account.and_then(|u| u.equipped_badge.clone()),
                    username: entry.username,
                    user_id: entry.user_id,
                }
            })
            .collect();
        sort_online(&mut online);
        online
    }

    fn lock_state(&self) -> Option<std::sync::MutexGuard<'_, RebuildState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("presence tracker state poisoned");
                None
            }
        }
    }
}
