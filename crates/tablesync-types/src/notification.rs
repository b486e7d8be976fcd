//! User notification entity

use crate::channel::Channel;
use crate::entity::SyncedEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A new order was placed
    OrderPlaced,
    /// An order changed status
    OrderUpdated,
    /// An order is ready
    OrderReady,
    /// An order was cancelled
    OrderCancelled,
    /// A payment came through
    PaymentReceived,
    /// Platform announcement
    System,
    /// Any kind this client does not know about
    #[serde(other)]
    Other,
}

impl NotificationKind {
    /// Check if this kind implies the order list changed
    pub fn affects_orders(&self) -> bool {
        matches!(
            self,
            Self::OrderPlaced | Self::OrderUpdated | Self::OrderReady | Self::OrderCancelled
        )
    }
}

/// A notification addressed to the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server-assigned id
    pub id: String,
    /// Recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Notification subtype
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short headline
    #[serde(default)]
    pub title: String,
    /// Body text
    #[serde(default)]
    pub message: String,
    /// Whether the user has read it
    #[serde(default)]
    pub is_read: bool,
    /// Related order, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Check if this notification implies the order list changed
    pub fn affects_orders(&self) -> bool {
        self.kind.affects_orders()
    }
}

impl SyncedEntity for Notification {
    const CHANNEL: Channel = Channel::Notifications;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Patch;

    #[test]
    fn test_notification_parsing() {
        let json = r#"{
            "id": "n-1",
            "userId": "u-1",
            "type": "order_placed",
            "title": "New order",
            "message": "Table 4 placed an order",
            "isRead": false,
            "orderId": "order-9"
        }"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::OrderPlaced);
        assert!(n.affects_orders());
        assert!(!n.is_read);
        assert_eq!(n.order_id.as_deref(), Some("order-9"));
    }

    #[test]
    fn test_unknown_kind_is_preserved_as_other() {
        let json = r#"{"id":"n-2","type":"loyalty_points","title":"","message":""}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::Other);
        assert!(!n.affects_orders());
    }

    #[test]
    fn test_mark_read_patch() {
        let n: Notification =
            serde_json::from_str(r#"{"id":"n-3","type":"system","isRead":false}"#).unwrap();
        let read = n.with_patch(&Patch::read(true)).unwrap();
        assert!(read.is_read);
        assert_eq!(read.kind, NotificationKind::System);
    }
}
