//! Session provider contract.
//!
//! The identity provider is external. The engine only needs to know who is
//! signed in right now and to be told when that changes.

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use atlerts_shared::identity::validate_identity;
use atlerts_shared::UserIdentity;

use crate::error::Result;

/// Source of login/logout events.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current user, updated on every login and logout. A fresh receiver
    /// observes the state at the moment it was created.
    fn auth_state(&self) -> watch::Receiver<Option<UserIdentity>>;

    fn current_user(&self) -> Option<UserIdentity> {
        self.auth_state().borrow().clone()
    }

    async fn sign_out(&self) -> Result<()>;
}

/// Session provider backed by a watch channel. Used for local development
/// and tests, where "signing in" is just choosing an identity.
#[derive(Debug)]
pub struct LocalSession {
    state: watch::Sender<Option<UserIdentity>>,
}

impl LocalSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn sign_in(&self, user: UserIdentity) -> Result<()> {
        validate_identity(&user)?;
        info!(user = %user, "Signed in");
        self.state.send_replace(Some(user));
        Ok(())
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for LocalSession {
    fn auth_state(&self) -> watch::Receiver<Option<UserIdentity>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(user) = self.state.send_replace(None) {
            info!(user = %user, "Signed out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use atlerts_shared::IdentityError;

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let session = LocalSession::new();
        let mut state = session.auth_state();
        assert_eq!(session.current_user(), None);

        session.sign_in(UserIdentity::from("alice")).unwrap();
        state.changed().await.unwrap();
        assert_eq!(state.borrow().as_ref().map(|u| u.as_str()), Some("alice"));

        session.sign_out().await.unwrap();
        state.changed().await.unwrap();
        assert!(state.borrow().is_none());
    }

    #[test]
    fn test_default_support_agent_can_sign_in() {
        let session = LocalSession::new();
        let agent = UserIdentity::from(atlerts_shared::constants::DEFAULT_SUPPORT_AGENT_ID);
        session.sign_in(agent.clone()).unwrap();
        assert_eq!(session.current_user(), Some(agent));
    }

    #[test]
    fn test_rejects_malformed_identity() {
        let session = LocalSession::new();
        let err = session.sign_in(UserIdentity::from("")).unwrap_err();
        assert_eq!(err, ClientError::Identity(IdentityError::Empty));
        assert_eq!(session.current_user(), None);

        let err = session.sign_in(UserIdentity::from("a/b")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Identity(IdentityError::ContainsPathSeparator(_))
        ));
    }
}
