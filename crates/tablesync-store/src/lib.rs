//! Canonical in-memory entity store for tablesync
//!
//! This crate holds the collection a coordinator keeps in sync: id-based
//! deduplication, optimistic mutations with rollback, and reconciliation
//! against authoritative server state.
//!
//! It has no async runtime and no networking, so it can be driven from any
//! executor (or none).
//!
//! # Example
//!
//! ```
//! use tablesync_store::{MutationTransport, SyncStore, UpsertOutcome};
//! use tablesync_types::{Order, Patch};
//!
//! let order: Order = serde_json::from_str(
//!     r#"{"id":"o-1","restaurantId":"r-1","status":"pending","totalAmount":"9.90"}"#,
//! ).unwrap();
//!
//! let mut store = SyncStore::new();
//! assert_eq!(store.upsert(order), UpsertOutcome::Inserted);
//!
//! let (optimistic, _ticket) = store
//!     .apply_optimistic("o-1", &Patch::status("ready"), MutationTransport::Socket)
//!     .unwrap();
//! assert_eq!(optimistic.status.as_str(), "ready");
//! assert!(store.is_pending("o-1"));
//! ```

pub mod store;

// Re-export main types
pub use store::{
    MutationTicket, MutationTransport, PendingMutation, StalePolicy, SyncStore, UpsertOutcome,
};
