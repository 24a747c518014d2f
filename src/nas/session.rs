//! Shared holder for the appliance session.

use tokio::sync::RwLock;

use super::{NasApi, NasError, Session};

/// When [`SessionCell::acquire`] authenticates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoginPolicy {
    /// Log in before every request. Costs one round trip per request but
    /// never acts on an expired session.
    #[default]
    EveryRequest,
    /// Log in only when no session is cached. Callers invalidate the cell
    /// after an authentication failure.
    Reuse,
}

/// Session slot shared by every request issued through one orchestrator.
///
/// Readers clone the cached session under the read lock; logging in takes
/// the write lock, so concurrent refreshes never interleave.
#[derive(Debug, Default)]
pub struct SessionCell {
    policy: LoginPolicy,
    current: RwLock<Option<Session>>,
}

impl SessionCell {
    /// Creates an empty cell.
    #[must_use]
    pub fn new(policy: LoginPolicy) -> Self {
        Self {
            policy,
            current: RwLock::new(None),
        }
    }

    /// Returns the login policy in force.
    #[must_use]
    pub const fn policy(&self) -> LoginPolicy {
        self.policy
    }

    /// Returns a session to issue calls under, logging in as the policy
    /// requires.
    ///
    /// # Errors
    ///
    /// Propagates the login failure.
    pub async fn acquire<A: NasApi + ?Sized>(&self, api: &A) -> Result<Session, NasError> {
        if self.policy == LoginPolicy::Reuse
            && let Some(session) = self.current.read().await.clone()
        {
            return Ok(session);
        }
        self.refresh(api).await
    }

    /// Logs in and replaces the cached session.
    ///
    /// # Errors
    ///
    /// Propagates the login failure and clears the cached session.
    pub async fn refresh<A: NasApi + ?Sized>(&self, api: &A) -> Result<Session, NasError> {
        let mut slot = self.current.write().await;
        match api.login().await {
            Ok(session) => {
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    /// Drops the cached session so the next acquire logs in again.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    /// Returns the cached session, if any.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }
}
