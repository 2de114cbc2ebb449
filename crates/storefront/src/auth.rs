//! Session identity.
//!
//! The cart never talks to the OTP login flow directly. It reads the current
//! [`Identity`] from an [`AuthSession`] and registers for change
//! notifications through [`AuthSession::subscribe`].

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;

use buildify_core::UserId;

/// A customer with a verified identity and an API bearer token.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct AuthenticatedUser {
    /// Account ID.
    pub id: UserId,
    /// Bearer token for the customer API.
    pub token: SecretString,
}

impl AuthenticatedUser {
    /// Create a new authenticated user.
    #[must_use]
    pub const fn new(id: UserId, token: SecretString) -> Self {
        Self { id, token }
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Who is browsing.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    /// Visitor without a verified identity.
    #[default]
    Anonymous,
    /// Signed-in customer.
    Authenticated(AuthenticatedUser),
}

impl Identity {
    /// Returns the signed-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(user) => Some(user),
        }
    }

    /// Returns `true` for a signed-in customer.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Two identities are the same when both are anonymous or both carry the
    /// same account ID. A refreshed token does not change identity.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Anonymous, Self::Anonymous) => true,
            (Self::Authenticated(a), Self::Authenticated(b)) => a.id == b.id,
            _ => false,
        }
    }
}

/// Shared authentication state with change notification.
///
/// Cheaply cloneable; all clones observe the same identity.
#[derive(Clone)]
pub struct AuthSession {
    tx: watch::Sender<Identity>,
}

impl AuthSession {
    /// Create a session for an anonymous visitor.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::with_identity(Identity::Anonymous)
    }

    /// Create a session starting from a known identity (e.g. a restored login).
    #[must_use]
    pub fn with_identity(identity: Identity) -> Self {
        let (tx, _rx) = watch::channel(identity);
        Self { tx }
    }

    /// Snapshot of the current identity.
    #[must_use]
    pub fn current(&self) -> Identity {
        self.tx.borrow().clone()
    }

    /// Returns `true` if a customer is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    /// Record a successful login.
    ///
    /// Observers are only notified if the identity actually changed; a token
    /// refresh for the same account is stored silently.
    pub fn sign_in(&self, user: AuthenticatedUser) {
        self.publish(Identity::Authenticated(user));
    }

    /// Record a logout.
    pub fn sign_out(&self) {
        self.publish(Identity::Anonymous);
    }

    /// Register for identity-change notifications.
    ///
    /// The receiver starts with the current identity marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Identity> {
        self.tx.subscribe()
    }

    fn publish(&self, next: Identity) {
        self.tx.send_if_modified(|current| {
            let changed = !current.same_as(&next);
            *current = next;
            changed
        });
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::anonymous()
    }
}
