//! Re-exports for convenience
//!
//! Import everything you need with:
//! ```
//! use tablesync_sdk::prelude::*;
//! ```

// Client
pub use crate::builder::SyncClientBuilder;
pub use crate::client::{Dashboard, Session, SyncClient};
pub use crate::config::{ConfigError, SyncConfig};

// Types from tablesync-types
pub use tablesync_types::{
    AuthToken, Channel, Decimal, Notification, NotificationKind, Order, OrderItem, OrderStatus,
    Patch, SubscriptionKey, SyncError, SyncResult, SyncedEntity,
};

// Store types
pub use tablesync_store::{StalePolicy, SyncStore};

// REST types
pub use tablesync_rest::{EntityApi, RestClient, RestError};

// Socket coordination types
pub use tablesync_ws::{
    AuthMode, BridgeAction, ConnectInfo, ConnectionCoordinator, ConnectionEvent, ConnectionState,
    CreatedInfo, CrossChannelBridge, DataEvent, DisconnectReason, ErrorEvent, Hooks,
    ReconnectPolicy, RefreshSource, SyncEvent,
};
