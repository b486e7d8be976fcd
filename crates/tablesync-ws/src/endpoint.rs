//! Socket endpoint and URL construction

use std::fmt;
use tablesync_types::{AuthToken, Channel, SubscriptionKey, SyncError, SyncResult};

/// How the auth token reaches the socket server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// `{"type":"AUTH","token":...}` as the first frame after open
    #[default]
    Handshake,
    /// `token` query parameter on the socket URL
    QueryString,
}

impl AuthMode {
    /// Parse `handshake` / `query`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "handshake" => Some(Self::Handshake),
            "query" | "querystring" | "query_string" => Some(Self::QueryString),
            _ => None,
        }
    }
}

/// Socket server base URL plus auth placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
    base_url: String,
    auth_mode: AuthMode,
}

impl SocketEndpoint {
    /// Create an endpoint for a `ws://` or `wss://` base URL
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("ws://") || base_url.starts_with("wss://")) {
            return Err(SyncError::Configuration(format!(
                "socket URL must start with ws:// or wss://: {}",
                base_url
            )));
        }
        Ok(Self {
            base_url,
            auth_mode: AuthMode::default(),
        })
    }

    /// Set the auth placement
    pub fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Auth placement
    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Full connection URL: `{base}/{channel}?subscriptionKey={id}[&token={token}]`
    pub fn url(&self, channel: Channel, key: &SubscriptionKey, token: &AuthToken) -> SyncResult<String> {
        let mut params = vec![("subscriptionKey", key.as_str())];
        if self.auth_mode == AuthMode::QueryString {
            params.push(("token", token.expose()));
        }
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| SyncError::Configuration(e.to_string()))?;

        Ok(format!("{}/{}?{}", self.base_url, channel, query))
    }

    /// Connection URL safe for logs
    ///
    /// Encodes the key exactly as [`url`](Self::url) does.
    pub fn redacted_url(&self, channel: Channel, key: &SubscriptionKey) -> String {
        let query = serde_urlencoded::to_string([("subscriptionKey", key.as_str())])
            .unwrap_or_else(|_| format!("subscriptionKey={}", key));
        match self.auth_mode {
            AuthMode::Handshake => format!("{}/{}?{}", self.base_url, channel, query),
            AuthMode::QueryString => {
                format!("{}/{}?{}&token=[REDACTED]", self.base_url, channel, query)
            }
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}
