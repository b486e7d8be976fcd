//! High-level client for restaurant order and notification sync
//!
//! This crate wires the tablesync building blocks into one client: a REST
//! API for snapshots and mutations, one push socket per channel, REST
//! polling while a socket is down, and a bridge that refreshes orders when
//! a notification says they changed.
//!
//! # Quick Start
//!
//! ```no_run
//! use tablesync_sdk::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncClient::builder("https://api.example.com")
//!         .with_ws_url("wss://rt.example.com")
//!         .with_hooks(Hooks::new().on_created(|created| {
//!             if created.channel == Channel::Orders {
//!                 println!("New order {}", created.id);
//!             }
//!         }))
//!         .build()?;
//!
//!     let session = client.session(AuthToken::new("token")?);
//!     let dashboard = session
//!         .dashboard(SubscriptionKey::new("restaurant-1")?, SubscriptionKey::new("user-1")?)
//!         .await?;
//!
//!     let mut events = dashboard.orders().subscribe();
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             SyncEvent::Data(DataEvent::Created(order)) => {
//!                 println!("{} for table {:?}", order.id, order.table_number);
//!             }
//!             SyncEvent::Connection(ConnectionEvent::FallbackStarted { .. }) => {
//!                 println!("Live updates paused, polling");
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Realtime first**: push sockets per restaurant and per user
//! - **Never stale**: REST polling whenever a socket is down
//! - **Optimistic updates**: instant local changes, rolled back on rejection
//! - **Shared coordinators**: one socket per subscription across views
//! - **Configurable**: builder API or `TABLESYNC_*` environment variables

pub mod builder;
pub mod client;
pub mod config;
pub mod prelude;

// Re-export main types
pub use builder::SyncClientBuilder;
pub use client::{Dashboard, Session, SyncClient};
pub use config::{ConfigError, SyncConfig};

// Re-export commonly used types from dependencies
pub use tablesync_types::{
    AuthToken, Channel, Notification, Order, OrderStatus, Patch, SubscriptionKey, SyncError,
    SyncResult,
};
pub use tablesync_ws::{ConnectionState, Hooks, ReconnectPolicy, SyncEvent};
