//! Restaurant order entity

use crate::channel::Channel;
use crate::entity::SyncedEntity;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status in the kitchen lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed by the customer, not yet seen by staff
    Pending,
    /// Accepted by the restaurant
    Confirmed,
    /// Being cooked
    Preparing,
    /// Ready for pickup / serving
    Ready,
    /// Delivered to the table
    Served,
    /// Paid and closed
    Completed,
    /// Cancelled by customer or staff
    Cancelled,
    /// Any status this client does not know about
    #[serde(other)]
    Other,
}

impl OrderStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Served => "served",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }

    /// Check if the kitchen still has work to do on this order
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Confirmed | Self::Preparing | Self::Ready
        )
    }

    /// Check if the order can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line on an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Menu item id
    pub menu_item_id: String,
    /// Display name at the time of ordering
    pub name: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Decimal,
    /// Free-form kitchen notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OrderItem {
    /// Price of this line
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A restaurant order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Server-assigned order id
    pub id: String,
    /// Owning restaurant
    pub restaurant_id: String,
    /// Table the order was placed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<u32>,
    /// Customer display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Current status
    pub status: OrderStatus,
    /// Ordered items
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Order total as billed by the server
    pub total_amount: Decimal,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Total number of units across all lines
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Check if the kitchen still has work to do on this order
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Check if the order can no longer change
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl SyncedEntity for Order {
    const CHANNEL: Channel = Channel::Orders;

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}
