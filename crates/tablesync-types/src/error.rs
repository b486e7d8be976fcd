//! Error types for tablesync

use std::time::Duration;
use thiserror::Error;

/// Main error type for synchronization operations
#[derive(Error, Debug)]
pub enum SyncError {
    // === Connection Errors ===
    /// Failed to establish the socket connection
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Connection attempt timed out
    #[error("Connection timeout after {timeout:?} to {url}")]
    ConnectionTimeout { url: String, timeout: Duration },

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // === Authentication Errors ===
    /// Missing or rejected credentials; the user must sign in again
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Subscription key is empty or otherwise unusable
    #[error("Invalid subscription key: {0}")]
    InvalidSubscriptionKey(String),

    // === Protocol Errors ===
    /// Failed to parse or encode a JSON message
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String, raw: Option<String> },

    /// Server reported an error over the socket
    #[error("Server error: {message}")]
    Server { message: String },

    // === Data Errors ===
    /// REST collaborator rejected or failed a request
    #[error("REST request failed: {message}")]
    Rest { status: Option<u16>, message: String },

    /// No entity with this id is known
    #[error("Unknown entity: {id}")]
    UnknownEntity { id: String },

    /// The entity was deleted before a mutation was confirmed
    #[error("Entity {id} was deleted")]
    EntityDeleted { id: String },

    /// A patch could not be applied
    #[error("Invalid patch for {id}: {reason}")]
    InvalidPatch { id: String, reason: String },

    // === Internal Errors ===
    /// Internal channel was closed unexpectedly
    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,

    /// Coordinator has been disposed
    #[error("Coordinator disposed")]
    Disposed,

    /// Invalid state transition
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Returns true if this error is potentially recoverable via retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. } | Self::WebSocket(_) => {
                true
            }
            Self::Rest { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Returns true if the user has to sign in again
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Returns true if this error requires reconnection
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::WebSocket("reset".into()).is_retryable());
        assert!(SyncError::Rest { status: Some(503), message: "down".into() }.is_retryable());
        assert!(SyncError::Rest { status: None, message: "dns".into() }.is_retryable());
        assert!(!SyncError::Rest { status: Some(422), message: "bad".into() }.is_retryable());
        assert!(!SyncError::AuthenticationFailed { reason: "expired".into() }.is_retryable());
        assert!(!SyncError::Disposed.is_retryable());
    }

    #[test]
    fn test_auth_and_reconnect_flags() {
        assert!(SyncError::AuthenticationFailed { reason: "x".into() }.is_auth());
        assert!(SyncError::WebSocket("x".into()).requires_reconnect());
        assert!(!SyncError::Server { message: "x".into() }.requires_reconnect());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::UnknownEntity { id: "order-1".into() };
        assert!(err.to_string().contains("order-1"));
    }
}
