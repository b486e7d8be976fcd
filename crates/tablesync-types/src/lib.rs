//! Shared types for the tablesync real-time client
//!
//! This crate provides the core type definitions used across the tablesync
//! workspace. It has minimal dependencies and no async runtime.
//!
//! # Key Types
//!
//! - [`SyncedEntity`] - Server-owned record kept in sync ([`Order`], [`Notification`])
//! - [`Channel`], [`SubscriptionKey`], [`AuthToken`] - What a coordinator subscribes to
//! - [`Patch`] - Field overrides applied by a mutation
//! - [`InboundMessage`], [`OutboundMessage`] - Socket wire messages
//! - [`SyncError`] - Error types

pub mod channel;
pub mod entity;
pub mod error;
pub mod messages;
pub mod notification;
pub mod order;

// Re-export commonly used types
pub use channel::*;
pub use entity::*;
pub use error::*;
pub use messages::*;
pub use notification::*;
pub use order::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;
