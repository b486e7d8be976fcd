//! Common test utilities and fixtures for integration tests
//!
//! Frames mirror what the realtime service pushes for a restaurant dashboard.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tablesync_rest::MockEntityApi;
use tablesync_sdk::prelude::*;
use tablesync_ws::{MockServer, TransportFactory};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

/// Route SDK logs to the test harness; set `RUST_LOG=tablesync_ws=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const API_URL: &str = "https://api.kitchen.test";
pub const WS_URL: &str = "ws://rt.kitchen.test";
pub const RESTAURANT: &str = "rest-1";
pub const USER: &str = "user-1";

/// Order in the shape returned by `GET /orders`
pub fn order(id: &str, status: &str) -> Order {
    serde_json::from_value(json!({
        "id": id,
        "restaurantId": RESTAURANT,
        "tableNumber": 4,
        "status": status,
        "items": [
            {"menuItemId": "m-1", "name": "Margherita", "quantity": 2, "unitPrice": "9.50"}
        ],
        "totalAmount": "19.00",
        "createdAt": "2026-03-01T18:00:00Z",
        "updatedAt": "2026-03-01T18:00:00Z",
    }))
    .expect("valid order fixture")
}

/// Notification in the shape returned by `GET /notifications`
pub fn notification(id: &str, kind: &str) -> Notification {
    serde_json::from_value(json!({
        "id": id,
        "userId": USER,
        "type": kind,
        "title": "Kitchen",
        "message": "Table 4 needs attention",
        "isRead": false,
    }))
    .expect("valid notification fixture")
}

pub fn created_frame<T: serde::Serialize>(item: &T) -> String {
    json!({"type": "CREATED", "item": item}).to_string()
}

pub fn updated_frame<T: serde::Serialize>(item: &T) -> String {
    json!({"type": "UPDATED", "item": item}).to_string()
}

pub fn deleted_frame(id: &str) -> String {
    json!({"type": "DELETED", "id": id}).to_string()
}

pub fn snapshot_frame<T: serde::Serialize>(items: &[T]) -> String {
    json!({"type": "INITIAL_SNAPSHOT", "items": items}).to_string()
}

pub fn restaurant() -> SubscriptionKey {
    SubscriptionKey::new(RESTAURANT).expect("valid key")
}

pub fn user() -> SubscriptionKey {
    SubscriptionKey::new(USER).expect("valid key")
}

pub fn token() -> AuthToken {
    AuthToken::new("kitchen-token").expect("valid token")
}

/// A client whose sockets and REST API are in-memory mocks
pub struct Kitchen {
    pub client: SyncClient,
    pub order_server: MockServer,
    pub notification_server: MockServer,
    pub orders_api: MockEntityApi<Order>,
    pub notifications_api: MockEntityApi<Notification>,
}

impl Kitchen {
    pub fn new(orders: Vec<Order>, notifications: Vec<Notification>) -> Self {
        Self::with_builder(
            SyncClient::builder(API_URL).with_ws_url(WS_URL),
            orders,
            notifications,
        )
    }

    pub fn with_builder(
        builder: SyncClientBuilder,
        orders: Vec<Order>,
        notifications: Vec<Notification>,
    ) -> Self {
        init_tracing();
        let order_server = MockServer::new();
        let notification_server = MockServer::new();

        let factory: TransportFactory = {
            let order_server = order_server.clone();
            let notification_server = notification_server.clone();
            Arc::new(move |channel: Channel| -> Box<dyn tablesync_ws::Transport> {
                match channel {
                    Channel::Orders => Box::new(order_server.transport()),
                    Channel::Notifications => Box::new(notification_server.transport()),
                }
            })
        };

        let client = builder
            .with_transport_factory(factory)
            .build()
            .expect("valid client configuration");

        Self {
            client,
            order_server,
            notification_server,
            orders_api: MockEntityApi::new(orders),
            notifications_api: MockEntityApi::new(notifications),
        }
    }

    pub fn session(&self) -> Session {
        self.client.session_with(
            token(),
            Arc::new(self.orders_api.clone()),
            Arc::new(self.notifications_api.clone()),
        )
    }
}

/// Wait for the first event matching `matches`
pub async fn next_matching<T: Clone>(
    events: &mut broadcast::Receiver<SyncEvent<T>>,
    mut matches: impl FnMut(&SyncEvent<T>) -> bool,
) -> SyncEvent<T> {
    timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_connected<T>(event: &SyncEvent<T>) -> bool {
    matches!(event, SyncEvent::Connection(ConnectionEvent::Connected { .. }))
}

/// Let spawned tasks run to their next await point
pub async fn settle() {
    sleep(Duration::from_millis(10)).await;
}
