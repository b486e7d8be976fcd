//! Coordinator events
//!
//! Every coordinator publishes [`SyncEvent`]s on a broadcast channel; UI
//! layers and the cross-channel bridge subscribe to them.

use std::time::Duration;

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server closed the connection
    ServerClosed,
    /// Network or protocol error
    NetworkError(String),
    /// Credentials were rejected
    AuthRejected(String),
    /// Client disposed the coordinator
    Disposed,
}

/// Where an authoritative full collection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    /// REST snapshot taken by `start`
    Initial,
    /// REST refresh requested by the caller
    Manual,
    /// REST refresh from the fallback poller
    Poll,
    /// `INITIAL_SNAPSHOT` frame on the socket
    Socket,
}

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Opening the socket
    Connecting {
        /// Failed cycles since the last successful open
        attempt: u32,
    },
    /// Socket is open; realtime mode
    Connected {
        /// Whether an earlier connection existed
        is_reconnection: bool,
    },
    /// An open socket was lost
    Disconnected {
        /// Reason for disconnection
        reason: DisconnectReason,
    },
    /// Waiting out a backoff delay before the next attempt
    Reconnecting {
        /// Attempt number (1-indexed)
        attempt: u32,
        /// Delay before this attempt
        delay: Duration,
    },
    /// REST polling took over
    FallbackStarted {
        /// Polling interval
        interval: Duration,
    },
    /// REST polling stopped
    FallbackStopped,
    /// Credentials rejected; the coordinator stopped
    AuthRejected {
        /// Server-provided reason
        reason: String,
    },
    /// Coordinator torn down
    Disposed,
}

/// Store changes
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent<T> {
    /// Collection replaced by an authoritative list
    Replaced {
        /// Entities now in the store
        count: usize,
        /// Entities whose ids were not present before
        added: Vec<T>,
        /// Origin of the list
        source: RefreshSource,
    },
    /// New entity
    Created(T),
    /// Authoritative entity state applied
    Updated(T),
    /// Entity removed
    Deleted {
        /// Id of the removed entity
        id: String,
    },
    /// Local mutation applied ahead of server confirmation
    Optimistic(T),
    /// Optimistic mutation undone
    RolledBack(T),
}

/// Non-fatal errors surfaced to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// `ERROR` frame from the server
    Server {
        /// Server message
        message: String,
    },
    /// REST refresh failed; the store kept its contents
    RefreshFailed {
        /// Failure description
        message: String,
    },
    /// A mutation was rejected and rolled back
    MutationRejected {
        /// Entity id
        id: String,
        /// Failure description
        reason: String,
    },
    /// A frame could not be parsed and was dropped
    MalformedFrame {
        /// Parse error
        reason: String,
    },
}

/// Combined event type for event streams
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<T> {
    /// Connection-related event
    Connection(ConnectionEvent),
    /// Store change
    Data(DataEvent<T>),
    /// Error signal
    Error(ErrorEvent),
}

impl<T> SyncEvent<T> {
    /// Check if this is a connection event
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl<T> From<ConnectionEvent> for SyncEvent<T> {
    fn from(event: ConnectionEvent) -> Self {
        SyncEvent::Connection(event)
    }
}

impl<T> From<DataEvent<T>> for SyncEvent<T> {
    fn from(event: DataEvent<T>) -> Self {
        SyncEvent::Data(event)
    }
}

impl<T> From<ErrorEvent> for SyncEvent<T> {
    fn from(event: ErrorEvent) -> Self {
        SyncEvent::Error(event)
    }
}
