//! Error types for REST operations

use tablesync_types::SyncError;

/// Errors that can occur during REST operations
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token missing, expired or rejected (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// API returned an error body or status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message from the `{status:"error", message}` body
        message: String,
    },

    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Base URL cannot be used to build endpoint URLs
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl RestError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Unauthorized(_) | Self::Parse(_) | Self::InvalidUrl(_) => false,
        }
    }

    /// Check if the user has to sign in again
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<RestError> for SyncError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Unauthorized(reason) => SyncError::AuthenticationFailed { reason },
            RestError::Api { status, message } => SyncError::Rest {
                status: Some(status),
                message,
            },
            RestError::Http(e) => SyncError::Rest {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            RestError::Parse(message) => SyncError::InvalidJson { message, raw: None },
            RestError::InvalidUrl(url) => SyncError::Configuration(format!("invalid URL: {}", url)),
        }
    }
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(RestError::Api { status: 503, message: "down".into() }.is_retryable());
        assert!(RestError::Api { status: 429, message: "slow".into() }.is_retryable());
        assert!(!RestError::Api { status: 404, message: "gone".into() }.is_retryable());
        assert!(!RestError::Unauthorized("expired".into()).is_retryable());
    }

    #[test]
    fn test_conversion_to_sync_error() {
        let err: SyncError = RestError::Unauthorized("expired".into()).into();
        assert!(err.is_auth());

        let err: SyncError = RestError::Api { status: 422, message: "bad status".into() }.into();
        assert!(matches!(err, SyncError::Rest { status: Some(422), .. }));
        assert!(err.to_string().contains("bad status"));
    }
}
