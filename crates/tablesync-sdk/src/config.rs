//! Process configuration
//!
//! Read once at startup, never re-read at runtime.
//!
//! | Variable | Default |
//! |---|---|
//! | `TABLESYNC_API_URL` | required |
//! | `TABLESYNC_WS_URL` | unset: polling only |
//! | `TABLESYNC_ORDERS_POLL_SECS` | 15 |
//! | `TABLESYNC_NOTIFICATIONS_POLL_SECS` | 30 |
//! | `TABLESYNC_AUTH_MODE` | `handshake` (or `query`) |

use std::time::Duration;
use tablesync_types::Channel;
use tablesync_ws::{AuthMode, SocketEndpoint};

/// REST base URL
pub const API_URL_VAR: &str = "TABLESYNC_API_URL";
/// Socket base URL
pub const WS_URL_VAR: &str = "TABLESYNC_WS_URL";
/// Order polling interval in seconds
pub const ORDERS_POLL_VAR: &str = "TABLESYNC_ORDERS_POLL_SECS";
/// Notification polling interval in seconds
pub const NOTIFICATIONS_POLL_VAR: &str = "TABLESYNC_NOTIFICATIONS_POLL_SECS";
/// Socket auth placement
pub const AUTH_MODE_VAR: &str = "TABLESYNC_AUTH_MODE";

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required variable not set
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// Variable set to something unusable
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Socket URL rejected
    #[error("invalid socket URL: {0}")]
    InvalidSocketUrl(String),

    /// REST URL rejected
    #[error("invalid API URL: {0}")]
    InvalidApiUrl(String),

    /// Polling interval too short
    #[error("polling interval must be at least 1 second")]
    PollIntervalTooShort,

    /// Timeout too short
    #[error("connection timeout must be at least 1 second")]
    TimeoutTooShort,

    /// Zero ack timeout
    #[error("ack timeout must be greater than zero")]
    AckTimeoutZero,
}

/// Endpoints and polling intervals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// REST base URL
    pub api_url: String,
    /// Socket base URL; `None` disables realtime
    pub ws_url: Option<String>,
    /// Order polling interval
    pub orders_poll_interval: Duration,
    /// Notification polling interval
    pub notifications_poll_interval: Duration,
    /// Socket auth placement
    pub auth_mode: AuthMode,
}

impl SyncConfig {
    /// Polling-only config with default intervals
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: None,
            orders_poll_interval: Channel::Orders.default_poll_interval(),
            notifications_poll_interval: Channel::Notifications.default_poll_interval(),
            auth_mode: AuthMode::default(),
        }
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = read(API_URL_VAR).ok_or(ConfigError::MissingVar(API_URL_VAR))?;
        let mut config = Self::new(api_url);
        config.ws_url = read(WS_URL_VAR);

        if let Some(value) = read(ORDERS_POLL_VAR) {
            config.orders_poll_interval = parse_secs(ORDERS_POLL_VAR, value)?;
        }
        if let Some(value) = read(NOTIFICATIONS_POLL_VAR) {
            config.notifications_poll_interval = parse_secs(NOTIFICATIONS_POLL_VAR, value)?;
        }
        if let Some(value) = read(AUTH_MODE_VAR) {
            config.auth_mode = AuthMode::parse(&value).ok_or_else(|| ConfigError::InvalidVar {
                name: AUTH_MODE_VAR,
                value: value.clone(),
                reason: "expected handshake or query".into(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check if a socket URL is configured
    pub fn is_realtime(&self) -> bool {
        self.ws_url.is_some()
    }

    /// Polling interval for `channel`
    pub fn poll_interval(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Orders => self.orders_poll_interval,
            Channel::Notifications => self.notifications_poll_interval,
        }
    }

    /// Socket endpoint, if realtime is enabled
    pub fn endpoint(&self) -> Result<Option<SocketEndpoint>, ConfigError> {
        self.ws_url
            .as_deref()
            .map(|url| {
                SocketEndpoint::new(url)
                    .map(|endpoint| endpoint.with_auth_mode(self.auth_mode))
                    .map_err(|e| ConfigError::InvalidSocketUrl(e.to_string()))
            })
            .transpose()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(self.api_url.clone()));
        }
        self.endpoint()?;

        if self.orders_poll_interval < Duration::from_secs(1)
            || self.notifications_poll_interval < Duration::from_secs(1)
        {
            return Err(ConfigError::PollIntervalTooShort);
        }

        Ok(())
    }
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::InvalidVar {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}
