//! Real-time socket coordination for tablesync channels
//!
//! This crate keeps one channel (orders or notifications) in sync with the
//! server: a push socket while it is up, REST polling while it is down.
//!
//! # Features
//!
//! - Exponential backoff reconnection that never gives up
//! - REST fallback polling, active only while the socket is down
//! - Optimistic mutations confirmed by the socket echo or REST verification
//! - Cross-channel bridge refreshing orders from notification traffic
//! - Broadcast event stream and observability hooks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablesync_rest::{ClientConfig, RestClient};
//! use tablesync_types::{AuthToken, Order, SubscriptionKey};
//! use tablesync_ws::{ConnectionCoordinator, CoordinatorConfig, SocketEndpoint, WsTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let token = AuthToken::new("token")?;
//!     let api = RestClient::with_config(ClientConfig::new("https://api.example.com"))?
//!         .with_token(token.clone());
//!
//!     let config = CoordinatorConfig::new()
//!         .with_endpoint(SocketEndpoint::new("wss://rt.example.com")?);
//!     let orders = ConnectionCoordinator::<Order>::new(
//!         config,
//!         Arc::new(api),
//!         Box::new(WsTransport::new()),
//!     );
//!
//!     let mut events = orders.subscribe();
//!     orders.start(SubscriptionKey::new("restaurant-1")?, token).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod coordinator;
pub mod dispatcher;
pub mod endpoint;
pub mod events;
pub mod hooks;
pub mod poller;
pub mod reconnect;
pub mod registry;
pub mod transport;

// Re-export main types
pub use bridge::{BridgeAction, BridgeHandle, CrossChannelBridge};
pub use coordinator::{ConnectionCoordinator, ConnectionState, CoordinatorConfig};
pub use dispatcher::{Dispatch, MessageDispatcher};
pub use endpoint::{AuthMode, SocketEndpoint};
pub use events::{
    ConnectionEvent, DataEvent, DisconnectReason, ErrorEvent, RefreshSource, SyncEvent,
};
pub use hooks::{ConnectInfo, CreatedInfo, Hooks};
pub use poller::FallbackPoller;
pub use reconnect::{BackoffTimer, ReconnectPolicy};
pub use registry::{CoordinatorFactory, CoordinatorRegistry};
pub use transport::{ws_transport_factory, Transport, TransportError, TransportFactory, WsTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockServer, MockTransport};
