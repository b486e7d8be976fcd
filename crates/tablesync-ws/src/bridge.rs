//! Order refreshes driven by notification traffic
//!
//! The two channels are independent sockets. When the order socket is down
//! but a notification says an order changed, the bridge refreshes orders
//! over REST instead of waiting for the next poll.

use crate::coordinator::{ConnectionCoordinator, ConnectionState};
use crate::events::{DataEvent, RefreshSource, SyncEvent};
use std::sync::Arc;
use tablesync_types::{Notification, Order};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the bridge did with a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    /// Orders were refreshed
    Refreshed,
    /// Orders are connected; the socket already pushes the change
    SkippedConnected,
    /// The notification does not concern orders
    SkippedIrrelevant,
    /// The refresh was attempted and failed
    RefreshFailed,
}

/// Forwards order-related notifications to the order coordinator
#[derive(Debug, Clone)]
pub struct CrossChannelBridge {
    orders: Arc<ConnectionCoordinator<Order>>,
}

impl CrossChannelBridge {
    /// Create a bridge refreshing `orders`
    pub fn new(orders: Arc<ConnectionCoordinator<Order>>) -> Self {
        Self { orders }
    }

    /// The order coordinator
    pub fn orders(&self) -> &Arc<ConnectionCoordinator<Order>> {
        &self.orders
    }

    /// React to one notification
    pub async fn handle(&self, notification: &Notification) -> BridgeAction {
        if !notification.affects_orders() {
            return BridgeAction::SkippedIrrelevant;
        }
        self.refresh_orders(&notification.id).await
    }

    /// React to several notifications with at most one refresh
    pub async fn handle_batch(&self, notifications: &[Notification]) -> BridgeAction {
        match notifications.iter().find(|n| n.affects_orders()) {
            Some(notification) => self.refresh_orders(&notification.id).await,
            None => BridgeAction::SkippedIrrelevant,
        }
    }

    async fn refresh_orders(&self, cause: &str) -> BridgeAction {
        if self.orders.state() == ConnectionState::Connected {
            debug!("Orders connected; ignoring notification {}", cause);
            return BridgeAction::SkippedConnected;
        }

        match self.orders.refresh().await {
            Ok(()) => {
                info!("Refreshed orders after notification {}", cause);
                BridgeAction::Refreshed
            }
            Err(e) => {
                warn!("Order refresh after notification {} failed: {}", cause, e);
                BridgeAction::RefreshFailed
            }
        }
    }

    /// Follow `notifications` in a background task
    ///
    /// Reacts to socket `CREATED` notifications and to notifications first
    /// seen in a poll or manual refresh. The initial snapshot is ignored.
    pub fn spawn(&self, notifications: &ConnectionCoordinator<Notification>) -> BridgeHandle {
        let mut events = notifications.subscribe();
        let bridge = self.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::Data(DataEvent::Created(notification))) => {
                        bridge.handle(&notification).await;
                    }
                    Ok(SyncEvent::Data(DataEvent::Replaced { added, source, .. }))
                        if source != RefreshSource::Initial =>
                    {
                        bridge.handle_batch(&added).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // A relevant notification may be among the skipped ones
                        warn!("Bridge missed {} notification events", skipped);
                        bridge.refresh_orders("(lagged)").await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Notification stream closed; bridge stopped");
        });

        BridgeHandle { task }
    }
}

/// Running bridge task; stops when dropped
#[derive(Debug)]
pub struct BridgeHandle {
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Stop forwarding
    pub fn stop(self) {
        self.task.abort();
    }

    /// Check if the task is still forwarding
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
