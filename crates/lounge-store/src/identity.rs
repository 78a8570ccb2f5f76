//! Who is signed in on this client.

use lounge_shared::types::UserId;
use tokio::sync::watch;

/// Delegated authentication. The receiver yields the current user id and
/// every later sign-in/sign-out.
pub trait IdentityProvider: Send + Sync {
    fn auth_state(&self) -> watch::Receiver<Option<UserId>>;
}

/// Identity that is signed in and out by hand.
pub struct MemoryIdentity {
    state: watch::Sender<Option<UserId>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn signed_in(user_id: impl Into<UserId>) -> Self {
        let identity = Self::new();
        identity.sign_in(user_id);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        self.state.send_replace(Some(user_id.into()));
    }

    pub fn sign_out(&self) {
        self.state.send_replace(None);
    }

    pub fn current(&self) -> Option<UserId> {
        self.state.borrow().clone()
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MemoryIdentity {
    fn auth_state(&self) -> watch::Receiver<Option<UserId>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_state_follows_sign_in() {
        let identity = MemoryIdentity::new();
        let mut rx = identity.auth_state();
        assert_eq!(*rx.borrow(), None);

        identity.sign_in("u1");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(UserId::as_str), Some("u1"));

        identity.sign_out();
        assert_eq!(identity.current(), None);
    }
}
