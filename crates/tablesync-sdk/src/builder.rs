//! Client Builder Pattern
//!
//! Fluent configuration for [`SyncClient`](crate::SyncClient) with defaults
//! from [`SyncConfig`] and validation before anything connects.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tablesync_sdk::builder::SyncClientBuilder;
//!
//! let builder = SyncClientBuilder::new("https://api.example.com")
//!     .with_ws_url("wss://rt.example.com")
//!     .with_orders_poll_interval(Duration::from_secs(10))
//!     .with_ack_timeout(Duration::from_secs(3));
//! assert!(builder.validate().is_ok());
//! ```

use crate::client::SyncClient;
use crate::config::{ConfigError, SyncConfig};
use std::fmt;
use std::time::Duration;
use tablesync_rest::{ClientConfig, RestClient};
use tablesync_store::StalePolicy;
use tablesync_types::{Notification, Order, SyncedEntity};
use tablesync_ws::{
    ws_transport_factory, AuthMode, CoordinatorConfig, Hooks, ReconnectPolicy, TransportFactory,
};
use tracing::info;

/// Builder for a [`SyncClient`]
#[derive(Clone)]
pub struct SyncClientBuilder {
    /// Endpoints and polling intervals
    pub config: SyncConfig,

    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,

    /// Socket connect timeout
    pub connect_timeout: Duration,

    /// Socket mutation ack timeout
    pub ack_timeout: Duration,

    /// REST request timeout
    pub request_timeout: Duration,

    /// Timestamp guard for authoritative writes
    pub stale_policy: StalePolicy,

    /// Observability hooks shared by both channels
    pub hooks: Hooks,

    /// Custom transports (tests, proxies)
    pub transport_factory: Option<TransportFactory>,
}

impl SyncClientBuilder {
    /// Create a builder for the given REST base URL
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::from_config(SyncConfig::new(api_url))
    }

    /// Create a builder from a loaded configuration
    pub fn from_config(config: SyncConfig) -> Self {
        Self {
            config,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            stale_policy: StalePolicy::default(),
            hooks: Hooks::default(),
            transport_factory: None,
        }
    }

    /// Create a builder from `TABLESYNC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        SyncConfig::from_env().map(Self::from_config)
    }

    /// Set the socket base URL
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = Some(url.into());
        self
    }

    /// Disable the sockets; both channels poll
    pub fn without_realtime(mut self) -> Self {
        self.config.ws_url = None;
        self
    }

    /// Set socket auth placement
    pub fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.config.auth_mode = mode;
        self
    }

    /// Set the order polling interval
    pub fn with_orders_poll_interval(mut self, interval: Duration) -> Self {
        self.config.orders_poll_interval = interval;
        self
    }

    /// Set the notification polling interval
    pub fn with_notifications_poll_interval(mut self, interval: Duration) -> Self {
        self.config.notifications_poll_interval = interval;
        self
    }

    /// Set the reconnection policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the socket connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket mutation ack timeout
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the REST request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the stale write policy
    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Set observability hooks
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Use custom transports instead of WebSockets
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;

        if self.connect_timeout < Duration::from_secs(1)
            || self.request_timeout < Duration::from_secs(1)
        {
            return Err(ConfigError::TimeoutTooShort);
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::AckTimeoutZero);
        }

        Ok(())
    }

    /// Coordinator settings for one channel
    pub fn coordinator_config<T: SyncedEntity>(&self) -> Result<CoordinatorConfig, ConfigError> {
        let mut config = CoordinatorConfig::new()
            .with_reconnect(self.reconnect.clone())
            .with_poll_interval(self.config.poll_interval(T::CHANNEL))
            .with_ack_timeout(self.ack_timeout)
            .with_stale_policy(self.stale_policy)
            .with_hooks(self.hooks.clone());
        if let Some(endpoint) = self.config.endpoint()? {
            config = config.with_endpoint(endpoint);
        }
        Ok(config)
    }

    /// Validate and build the client
    pub fn build(self) -> Result<SyncClient, ConfigError> {
        self.validate()?;

        let rest = RestClient::with_config(
            ClientConfig::new(self.config.api_url.clone())
                .with_timeout(self.request_timeout.as_secs()),
        )
        .map_err(|e| ConfigError::InvalidApiUrl(e.to_string()))?;

        let orders = self.coordinator_config::<Order>()?;
        let notifications = self.coordinator_config::<Notification>()?;
        let transports = self
            .transport_factory
            .unwrap_or_else(|| ws_transport_factory(self.connect_timeout));

        info!(
            "tablesync client for {} (realtime: {})",
            self.config.api_url,
            self.config.is_realtime()
        );
        Ok(SyncClient::from_parts(rest, orders, notifications, transports))
    }
}

impl fmt::Debug for SyncClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClientBuilder")
            .field("config", &self.config)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("ack_timeout", &self.ack_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("stale_policy", &self.stale_policy)
            .field("hooks", &self.hooks)
            .field(
                "transport_factory",
                &self.transport_factory.as_ref().map(|_| "..."),
            )
            .finish()
    }
}
