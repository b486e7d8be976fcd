//! Observability hooks for coordinator lifecycle monitoring
//!
//! Hooks observe connection events without consuming the event stream.
//! `on_created` doubles as the fire-and-forget side channel for new-entity
//! alerts (the kitchen chime); a panicking hook is caught and logged.
//!
//! # Example
//!
//! ```
//! use tablesync_ws::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_connect(|info| {
//!         println!("{} connected (reconnect: {})", info.channel, info.is_reconnection);
//!     })
//!     .on_reconnect_attempt(|attempt, delay| {
//!         println!("Reconnecting (attempt {}), waiting {:?}", attempt, delay);
//!     })
//!     .on_created(|created| {
//!         println!("New {} entity {}", created.channel, created.id);
//!     });
//! ```

use crate::events::DisconnectReason;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tablesync_types::Channel;
use tracing::warn;

/// Information about a successful connection
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    /// Channel that connected
    pub channel: Channel,
    /// Whether this is a reconnection
    pub is_reconnection: bool,
}

/// A genuinely new entity arrived over the socket
#[derive(Debug, Clone)]
pub struct CreatedInfo {
    /// Channel it arrived on
    pub channel: Channel,
    /// Entity id
    pub id: String,
}

/// Type alias for hook callbacks
pub type ConnectHook = Arc<dyn Fn(&ConnectInfo) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
pub type ReconnectAttemptHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(usize) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type CreatedHook = Arc<dyn Fn(&CreatedInfo) + Send + Sync>;

/// Observability hooks container
///
/// All hooks are optional and run synchronously on the coordinator's
/// worker. Keep them fast.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) on_connect: Option<ConnectHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
    pub(crate) on_reconnect_attempt: Option<ReconnectAttemptHook>,
    pub(crate) on_message: Option<MessageHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_created: Option<CreatedHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.as_ref().map(|_| "..."))
            .field("on_disconnect", &self.on_disconnect.as_ref().map(|_| "..."))
            .field("on_reconnect_attempt", &self.on_reconnect_attempt.as_ref().map(|_| "..."))
            .field("on_message", &self.on_message.as_ref().map(|_| "..."))
            .field("on_error", &self.on_error.as_ref().map(|_| "..."))
            .field("on_created", &self.on_created.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Hooks {
    /// Create a new empty hooks container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for successful connections
    ///
    /// Called each time the socket opens (including reconnections).
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectInfo) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback for lost connections
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback for reconnection attempts
    ///
    /// Called when a backoff wait is scheduled, with the attempt number
    /// (1-indexed) and the delay before this attempt.
    pub fn on_reconnect_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_reconnect_attempt = Some(Arc::new(f));
        self
    }

    /// Register a callback for received frames (with byte count)
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Register a callback for errors (with error message)
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback for new entities delivered by `CREATED`
    ///
    /// Not called for duplicates.
    pub fn on_created<F>(mut self, f: F) -> Self
    where
        F: Fn(&CreatedInfo) + Send + Sync + 'static,
    {
        self.on_created = Some(Arc::new(f));
        self
    }

    pub(crate) fn invoke_connect(&self, info: &ConnectInfo) {
        if let Some(ref hook) = self.on_connect {
            hook(info);
        }
    }

    pub(crate) fn invoke_disconnect(&self, reason: &DisconnectReason) {
        if let Some(ref hook) = self.on_disconnect {
            hook(reason);
        }
    }

    pub(crate) fn invoke_reconnect_attempt(&self, attempt: u32, delay: Duration) {
        if let Some(ref hook) = self.on_reconnect_attempt {
            hook(attempt, delay);
        }
    }

    pub(crate) fn invoke_message(&self, size: usize) {
        if let Some(ref hook) = self.on_message {
            hook(size);
        }
    }

    pub(crate) fn invoke_error(&self, msg: &str) {
        if let Some(ref hook) = self.on_error {
            hook(msg);
        }
    }

    /// Returns `false` if the hook panicked
    pub(crate) fn invoke_created(&self, info: &CreatedInfo) -> bool {
        let Some(ref hook) = self.on_created else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| hook(info))) {
            Ok(()) => true,
            Err(_) => {
                warn!("on_created hook panicked for {} {}", info.channel, info.id);
                false
            }
        }
    }
}
