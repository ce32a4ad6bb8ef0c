//! Identity boundary for cloud mode.
//!
//! An [`IdentityProvider`] yields a stable [`UserId`] and publishes changes
//! on a `watch` channel. The provider handshake itself is opaque here;
//! [`StaticIdentityProvider`] serves a configured user.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use zentodo_proto::task::UserId;

/// Where the session stands with respect to identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// Initial state while the identity check is in flight.
    #[default]
    Unknown,
    /// No identity: creates are ignored and no feed is held.
    Anonymous,
    /// Signed in; the repository is subscribed for this user.
    Authenticated(UserId),
}

impl AuthState {
    /// State corresponding to an optional identity.
    #[must_use]
    pub fn from_identity(user: Option<UserId>) -> Self {
        user.map_or(Self::Anonymous, Self::Authenticated)
    }

    /// The signed-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&UserId> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Unknown | Self::Anonymous => None,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "checking"),
            Self::Anonymous => write!(f, "signed out"),
            Self::Authenticated(user) => write!(f, "signed in as {user}"),
        }
    }
}

/// Errors that can occur during identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider has no account to sign in with.
    #[error("no identity configured")]
    NotConfigured,

    /// The user abandoned the sign-in flow.
    #[error("sign-in cancelled")]
    Cancelled,

    /// The provider failed.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// External authentication collaborator.
pub trait IdentityProvider: Send + Sync {
    /// The identity currently signed in, if any.
    fn current_identity(&self) -> Option<UserId>;

    /// Receiver observing identity changes; starts at the current identity.
    fn watch(&self) -> watch::Receiver<Option<UserId>>;

    /// Runs the sign-in flow and returns the resulting identity.
    fn sign_in(&self) -> impl Future<Output = Result<UserId, IdentityError>> + Send;

    /// Signs the current identity out.
    fn sign_out(&self) -> impl Future<Output = Result<(), IdentityError>> + Send;
}

impl<P: IdentityProvider + ?Sized> IdentityProvider for Arc<P> {
    fn current_identity(&self) -> Option<UserId> {
        (**self).current_identity()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        (**self).watch()
    }

    fn sign_in(&self) -> impl Future<Output = Result<UserId, IdentityError>> + Send {
        (**self).sign_in()
    }

    fn sign_out(&self) -> impl Future<Output = Result<(), IdentityError>> + Send {
        (**self).sign_out()
    }
}

/// Provider backed by a single configured account.
#[derive(Debug)]
pub struct StaticIdentityProvider {
    account: Option<UserId>,
    current: watch::Sender<Option<UserId>>,
}

impl StaticIdentityProvider {
    /// Provider for `account`, initially signed out.
    #[must_use]
    pub fn new(account: Option<UserId>) -> Self {
        let (current, _) = watch::channel(None);
        Self { account, current }
    }

    /// Provider for `account` with a remembered session (already signed in).
    #[must_use]
    pub fn signed_in(account: UserId) -> Self {
        let (current, _) = watch::channel(Some(account.clone()));
        Self {
            account: Some(account),
            current,
        }
    }

    /// Switches the active identity, as a provider would on an account change
    /// made elsewhere.
    pub fn set_identity(&self, user: Option<UserId>) {
        self.current.send_replace(user);
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> Option<UserId> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserId>> {
        self.current.subscribe()
    }

    async fn sign_in(&self) -> Result<UserId, IdentityError> {
        let account = self.account.clone().ok_or(IdentityError::NotConfigured)?;
        self.current.send_replace(Some(account.clone()));
        tracing::info!(user = %account, "signed in");
        Ok(account)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if self.current.send_replace(None).is_some() {
            tracing::info!("signed out");
        }
        Ok(())
    }
}
