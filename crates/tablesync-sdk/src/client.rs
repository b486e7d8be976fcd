//! High-level tablesync client

use crate::builder::SyncClientBuilder;
use crate::config::ConfigError;
use std::sync::Arc;
use tablesync_rest::{EntityApi, RestClient};
use tablesync_types::{AuthToken, Notification, Order, SubscriptionKey, SyncResult};
use tablesync_ws::{
    BridgeHandle, ConnectionCoordinator, CoordinatorConfig, CoordinatorRegistry,
    CrossChannelBridge, TransportFactory,
};
use tracing::{info, instrument};

/// Entry point: holds configuration, opens authenticated sessions
///
/// # Example
///
/// ```no_run
/// use tablesync_sdk::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = SyncClient::builder("https://api.example.com")
///         .with_ws_url("wss://rt.example.com")
///         .build()?;
///
///     let session = client.session(AuthToken::new("token")?);
///     let dashboard = session
///         .dashboard(SubscriptionKey::new("restaurant-1")?, SubscriptionKey::new("user-1")?)
///         .await?;
///
///     for order in dashboard.orders().snapshot() {
///         println!("{} {}", order.id, order.status);
///     }
///
///     session.logout().await;
///     Ok(())
/// }
/// ```
pub struct SyncClient {
    rest: RestClient,
    orders: CoordinatorConfig,
    notifications: CoordinatorConfig,
    transports: TransportFactory,
}

impl SyncClient {
    /// Create a new client builder
    pub fn builder(api_url: impl Into<String>) -> SyncClientBuilder {
        SyncClientBuilder::new(api_url)
    }

    /// Build a client from `TABLESYNC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        SyncClientBuilder::from_env()?.build()
    }

    pub(crate) fn from_parts(
        rest: RestClient,
        orders: CoordinatorConfig,
        notifications: CoordinatorConfig,
        transports: TransportFactory,
    ) -> Self {
        Self {
            rest,
            orders,
            notifications,
            transports,
        }
    }

    /// Check if sockets are configured
    pub fn is_realtime_enabled(&self) -> bool {
        self.orders.endpoint.is_some()
    }

    /// REST base client (unauthenticated)
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Open a session for a signed-in user
    pub fn session(&self, token: AuthToken) -> Session {
        let api = Arc::new(self.rest.with_token(token.clone()));
        self.session_with(token, api.clone(), api)
    }

    /// Open a session backed by custom REST collaborators
    pub fn session_with(
        &self,
        token: AuthToken,
        orders_api: Arc<dyn EntityApi<Order>>,
        notifications_api: Arc<dyn EntityApi<Notification>>,
    ) -> Session {
        Session {
            token,
            orders: registry(self.orders.clone(), orders_api, Arc::clone(&self.transports)),
            notifications: registry(
                self.notifications.clone(),
                notifications_api,
                Arc::clone(&self.transports),
            ),
        }
    }
}

fn registry<T: tablesync_types::SyncedEntity>(
    config: CoordinatorConfig,
    api: Arc<dyn EntityApi<T>>,
    transports: TransportFactory,
) -> CoordinatorRegistry<T> {
    CoordinatorRegistry::new(move || {
        ConnectionCoordinator::new(config.clone(), Arc::clone(&api), transports(T::CHANNEL))
    })
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("api", &self.rest.base_url().as_str())
            .field("realtime", &self.is_realtime_enabled())
            .finish()
    }
}

/// Coordinators for one signed-in user
///
/// Views asking for the same restaurant or user share one coordinator.
pub struct Session {
    token: AuthToken,
    orders: CoordinatorRegistry<Order>,
    notifications: CoordinatorRegistry<Notification>,
}

impl Session {
    /// Started order coordinator for a restaurant
    pub async fn orders(
        &self,
        restaurant: SubscriptionKey,
    ) -> SyncResult<Arc<ConnectionCoordinator<Order>>> {
        self.orders.acquire(restaurant, self.token.clone()).await
    }

    /// Started notification coordinator for a user
    pub async fn notifications(
        &self,
        user: SubscriptionKey,
    ) -> SyncResult<Arc<ConnectionCoordinator<Notification>>> {
        self.notifications.acquire(user, self.token.clone()).await
    }

    /// Both channels plus the bridge between them
    #[instrument(skip(self))]
    pub async fn dashboard(
        &self,
        restaurant: SubscriptionKey,
        user: SubscriptionKey,
    ) -> SyncResult<Dashboard> {
        let orders = self.orders(restaurant).await?;
        let notifications = self.notifications(user).await?;
        let bridge = CrossChannelBridge::new(Arc::clone(&orders)).spawn(&notifications);

        info!("Dashboard ready");
        Ok(Dashboard {
            orders,
            notifications,
            bridge,
        })
    }

    /// Dispose every coordinator opened by this session
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        tokio::join!(self.orders.dispose_all(), self.notifications.dispose_all());
        info!("Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("orders", &self.orders)
            .field("notifications", &self.notifications)
            .finish()
    }
}

/// Order and notification channels of one dashboard view
///
/// Dropping it stops the bridge; the coordinators live on while other
/// views hold them.
#[derive(Debug)]
pub struct Dashboard {
    orders: Arc<ConnectionCoordinator<Order>>,
    notifications: Arc<ConnectionCoordinator<Notification>>,
    bridge: BridgeHandle,
}

impl Dashboard {
    /// Order coordinator
    pub fn orders(&self) -> &Arc<ConnectionCoordinator<Order>> {
        &self.orders
    }

    /// Notification coordinator
    pub fn notifications(&self) -> &Arc<ConnectionCoordinator<Notification>> {
        &self.notifications
    }

    /// Check if both channels are on their sockets
    pub fn is_realtime(&self) -> bool {
        self.orders.is_realtime() && self.notifications.is_realtime()
    }

    /// Check if the bridge task is running
    pub fn is_bridged(&self) -> bool {
        self.bridge.is_running()
    }

    /// Unread notification count
    pub fn unread_count(&self) -> usize {
        self.notifications
            .snapshot()
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Active (not yet served or cancelled) order count
    pub fn active_order_count(&self) -> usize {
        self.orders
            .snapshot()
            .iter()
            .filter(|o| o.is_active())
            .count()
    }
}
