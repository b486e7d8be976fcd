//! Channel identity: which collection, whose entities, which credentials

use crate::error::{SyncError, SyncResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A logical real-time collection with its own connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Restaurant orders, keyed by restaurant id
    Orders,
    /// User notifications, keyed by user id
    Notifications,
}

impl Channel {
    /// Channel name as used in socket paths and wire messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Notifications => "notifications",
        }
    }

    /// REST collection path segment
    pub fn collection(&self) -> &'static str {
        self.as_str()
    }

    /// Default fallback polling interval for this channel
    pub fn default_poll_interval(&self) -> Duration {
        match self {
            Self::Orders => Duration::from_secs(15),
            Self::Notifications => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner id scoping which entities a channel delivers
///
/// A restaurant id for the orders channel, a user id for notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Create a subscription key, rejecting empty ids
    pub fn new(id: impl Into<String>) -> SyncResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidSubscriptionKey(
                "subscription key must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Bearer token for the socket and REST collaborators
///
/// Stored in a `SecretString` so it is zeroized on drop and never shows up
/// in `Debug` output.
pub struct AuthToken(SecretString);

impl AuthToken {
    /// Wrap a token. A missing (empty) token is an authentication error.
    pub fn new(token: impl Into<String>) -> SyncResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SyncError::AuthenticationFailed {
                reason: "missing auth token".into(),
            });
        }
        Ok(Self(SecretString::new(token.into_boxed_str())))
    }

    /// Access the raw token
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for AuthToken {
    fn clone(&self) -> Self {
        Self(SecretString::new(self.expose().to_owned().into_boxed_str()))
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}
