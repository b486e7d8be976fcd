//! REST fallback collaborator for the tablesync real-time client
//!
//! The socket is the primary transport; these endpoints are used for the
//! initial snapshot, fallback polling, and mutations while the socket is
//! down:
//!
//! - `GET {api}/{collection}?subscriptionKey={id}` - list
//! - `PATCH {api}/{collection}/{id}` - status / read mutation
//!
//! Both return the full entity state on success and a structured
//! `{"status":"error","message":"..."}` body on failure.
//!
//! # Example
//!
//! ```no_run
//! use tablesync_rest::{ClientConfig, EntityApi, RestClient};
//! use tablesync_types::{AuthToken, Order, Patch, SubscriptionKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::with_config(ClientConfig::new("https://api.example.com"))?
//!         .with_token(AuthToken::new("token")?);
//!     let key = SubscriptionKey::new("rest-1")?;
//!
//!     let orders: Vec<Order> = client.list(&key).await?;
//!     if let Some(order) = orders.first() {
//!         let updated: Order = client.update(&key, &order.id, &Patch::status("ready")).await?;
//!         println!("{} is now {}", updated.id, updated.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod error;

// Re-export main types
pub use api::EntityApi;
pub use client::{ClientConfig, RestClient};
pub use error::{RestError, RestResult};

#[cfg(any(test, feature = "test-utils"))]
pub use api::MockEntityApi;
