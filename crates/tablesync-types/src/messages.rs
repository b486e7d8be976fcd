//! Socket wire messages
//!
//! Inbound frames are discriminated by their `type` field:
//!
//! ```text
//! { "type": "INITIAL_SNAPSHOT", "items": [...] }
//! { "type": "CREATED", "item": {...} }
//! { "type": "UPDATED", "item": {...} }
//! { "type": "DELETED", "id": "..." }
//! { "type": "ERROR", "message": "..." }
//! ```

use crate::entity::Patch;
use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Longest raw frame excerpt kept in parse errors
const RAW_EXCERPT_LEN: usize = 256;

// ============================================================================
// Inbound
// ============================================================================

/// Parsed inbound socket frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub enum InboundMessage<T> {
    /// Full collection as currently known by the server
    InitialSnapshot {
        /// Entities; missing or null means "nothing to report"
        #[serde(default)]
        items: Option<Vec<T>>,
    },
    /// A new entity
    Created {
        /// The created entity
        item: T,
    },
    /// An existing entity changed
    Updated {
        /// The entity's authoritative state
        item: T,
    },
    /// An entity was removed
    Deleted {
        /// Id of the removed entity
        id: String,
    },
    /// Server-side error report
    Error {
        /// Human-readable message
        #[serde(default)]
        message: String,
    },
    /// A `type` this client does not handle
    #[serde(other)]
    Unknown,
}

impl<T: DeserializeOwned> InboundMessage<T> {
    /// Parse a raw text frame
    pub fn parse(text: &str) -> SyncResult<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::InvalidJson {
            message: e.to_string(),
            raw: Some(excerpt(text)),
        })
    }
}

impl<T> InboundMessage<T> {
    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialSnapshot { .. } => "INITIAL_SNAPSHOT",
            Self::Created { .. } => "CREATED",
            Self::Updated { .. } => "UPDATED",
            Self::Deleted { .. } => "DELETED",
            Self::Error { .. } => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(RAW_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Outbound socket frame
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage<'a> {
    /// Authentication handshake, sent first after the socket opens
    Auth {
        /// Bearer token
        token: &'a str,
    },
    /// Ask the server to resend the collection
    #[serde(rename_all = "camelCase")]
    Refresh {
        /// Owner id of the channel
        subscription_key: &'a str,
    },
    /// Request a field change on one entity
    #[serde(rename_all = "camelCase")]
    Mutate {
        /// Target entity id
        id: &'a str,
        /// Requested field changes
        patch: &'a Patch,
        /// Owner id of the channel
        subscription_key: &'a str,
    },
}

impl OutboundMessage<'_> {
    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::InvalidJson {
            message: e.to_string(),
            raw: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Order, OrderStatus};

    #[test]
    fn test_parse_created() {
        let msg: InboundMessage<Order> = InboundMessage::parse(
            r#"{"type":"CREATED","item":{"id":"o-1","restaurantId":"r","status":"pending","totalAmount":"5"}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Created { item } => {
                assert_eq!(item.id, "o-1");
                assert_eq!(item.status, OrderStatus::Pending);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_snapshot_without_items() {
        let msg: InboundMessage<Order> =
            InboundMessage::parse(r#"{"type":"INITIAL_SNAPSHOT"}"#).unwrap();
        assert_eq!(msg, InboundMessage::InitialSnapshot { items: None });

        let msg: InboundMessage<Order> =
            InboundMessage::parse(r#"{"type":"INITIAL_SNAPSHOT","items":[]}"#).unwrap();
        assert_eq!(msg, InboundMessage::InitialSnapshot { items: Some(vec![]) });
    }

    #[test]
    fn test_parse_deleted_and_error() {
        let msg: InboundMessage<Order> =
            InboundMessage::parse(r#"{"type":"DELETED","id":"o-9"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Deleted { id: "o-9".into() });

        let msg: InboundMessage<Order> =
            InboundMessage::parse(r#"{"type":"ERROR","message":"boom"}"#).unwrap();
        assert_eq!(msg.kind(), "ERROR");
    }

    #[test]
    fn test_unknown_type() {
        let msg: InboundMessage<Order> =
            InboundMessage::parse(r#"{"type":"PING","at":1}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(InboundMessage::<Order>::parse("not json").is_err());
        assert!(InboundMessage::<Order>::parse(r#"{"item":{}}"#).is_err());
        // CREATED without an item is malformed, not unknown
        let err = InboundMessage::<Order>::parse(r#"{"type":"CREATED"}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidJson { raw: Some(_), .. }));
    }

    #[test]
    fn test_outbound_serialization() {
        let refresh = OutboundMessage::Refresh { subscription_key: "rest-1" };
        assert_eq!(
            refresh.to_json().unwrap(),
            r#"{"type":"REFRESH","subscriptionKey":"rest-1"}"#
        );

        let patch = Patch::status("ready");
        let mutate = OutboundMessage::Mutate {
            id: "order-1",
            patch: &patch,
            subscription_key: "rest-1",
        };
        assert_eq!(
            mutate.to_json().unwrap(),
            r#"{"type":"MUTATE","id":"order-1","patch":{"status":"ready"},"subscriptionKey":"rest-1"}"#
        );

        let auth = OutboundMessage::Auth { token: "t" };
        assert_eq!(auth.to_json().unwrap(), r#"{"type":"AUTH","token":"t"}"#);
    }
}
