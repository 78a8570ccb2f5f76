//! Account creation and username changes.

use std::sync::Arc;

use lounge_shared::constants;
use lounge_shared::models::{BannedUsername, User};
use lounge_shared::username::normalize_username;
use lounge_shared::{Clock, UserId};
use lounge_store::{records, DocumentStore, Query};
use serde_json::json;
use tracing::{debug, info};

use crate::cache::DocumentCache;
use crate::error::{ChatError, Result};

pub struct AccountService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    users: Arc<DocumentCache<User>>,
}

impl AccountService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, users: Arc<DocumentCache<User>>) -> Self {
        Self { store, clock, users }
    }

    /// Create the account for a freshly signed-up identity.
    pub async fn register(&self, user_id: &UserId, raw_username: &str) -> Result<User> {
        if records::get::<User>(self.store.as_ref(), user_id.as_str())
            .await?
            .is_some()
        {
            return Err(ChatError::permission("an account already exists for this login"));
        }

        let username = self.available_username(user_id, raw_username).await?;
        let user = User::new(username, self.clock.now_millis());
        records::put(self.store.as_ref(), user_id.as_str(), &user).await?;
        info!(user = %user_id, username = %user.username, "account registered");
        Ok(user)
    }

    /// Change `user_id`'s username. Returns the stored (normalised) name.
    pub async fn rename(&self, user_id: &UserId, raw_username: &str) -> Result<String> {
        let username = self.available_username(user_id, raw_username).await?;
        self.store
            .update(constants::USERS, user_id.as_str(), json!({ "username": username }))
            .await?;
        self.users.invalidate(user_id.as_str()).await;
        info!(user = %user_id, username = %username, "username changed");
        Ok(username)
    }

    /// Normalise `raw` and make sure nobody else holds or has lost it.
    async fn available_username(&self, user_id: &UserId, raw: &str) -> Result<String> {
        let username = normalize_username(raw)?;

        if records::get::<BannedUsername>(self.store.as_ref(), &username)
            .await?
            .is_some()
        {
            debug!(username = %username, "refused banned username");
            return Err(ChatError::Banned);
        }

        let holders = self
            .store
            .query(&Query::collection(constants::USERS).where_eq("username", username.as_str()))
            .await?;
        if holders.iter().any(|doc| doc.id != user_id.as_str()) {
            return Err(ChatError::UsernameTaken);
        }

        Ok(username)
    }
}
