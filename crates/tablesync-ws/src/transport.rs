//! Push socket transport abstraction
//!
//! The coordinator drives a [`Transport`] so that its state machine can be
//! tested without a network. [`WsTransport`] is the tokio-tungstenite
//! implementation; [`MockTransport`] and [`MockServer`] (feature
//! `test-utils`) script a server from tests.
//!
//! # Example
//!
//! ```no_run
//! use tablesync_ws::transport::{Transport, TransportError, WsTransport};
//!
//! async fn example() -> Result<(), TransportError> {
//!     let mut transport = WsTransport::new();
//!     transport.connect("wss://rt.example.com/orders?subscriptionKey=rest-1").await?;
//!     transport.send(r#"{"type":"REFRESH","subscriptionKey":"rest-1"}"#).await?;
//!     if let Some(frame) = transport.recv().await? {
//!         println!("Received: {}", frame);
//!     }
//!     transport.close().await
//! }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tablesync_types::Channel;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

/// Close codes the server uses to reject credentials
const AUTH_CLOSE_CODES: [u16; 4] = [1008, 4001, 4401, 4403];

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Server rejected the credentials (HTTP 401/403 or an auth close code)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("not connected")]
    NotConnected,

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Check if this error must not be retried
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// One push-socket connection
///
/// Implementations hold at most one open stream: `connect` drops any
/// previous stream before opening a new one.
#[async_trait]
pub trait Transport: Send {
    /// Open a connection to `url`, replacing any previous one
    async fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    /// Send a text frame
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next text frame
    ///
    /// Returns `None` if the connection was closed gracefully.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;
}

/// Creates one transport per coordinator of the given channel
pub type TransportFactory = Arc<dyn Fn(Channel) -> Box<dyn Transport> + Send + Sync>;

/// Factory producing [`WsTransport`]s with the given connect timeout
pub fn ws_transport_factory(connect_timeout: Duration) -> TransportFactory {
    Arc::new(move |_channel: Channel| -> Box<dyn Transport> {
        Box::new(WsTransport::new().with_timeout(connect_timeout))
    })
}

/// Real WebSocket transport using tokio-tungstenite
pub struct WsTransport {
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    /// Create a new WebSocket transport
    pub fn new() -> Self {
        Self {
            stream: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

fn map_connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response)
            if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
        {
            TransportError::Unauthorized(format!("HTTP {} on upgrade", response.status()))
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

fn close_result(frame: Option<CloseFrame<'_>>) -> Result<Option<String>, TransportError> {
    match frame {
        Some(frame) if AUTH_CLOSE_CODES.contains(&u16::from(frame.code)) => {
            Err(TransportError::Unauthorized(format!(
                "closed with code {}: {}",
                u16::from(frame.code),
                frame.reason
            )))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl Transport for WsTransport {
    // The URL may carry the token; never record it
    #[instrument(skip_all)]
    async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        // Drop any previous stream first
        self.stream = None;
        debug!("Connecting to WebSocket");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(map_connect_error)?;

        self.stream = Some(ws_stream);
        debug!("WebSocket connected");
        Ok(())
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        stream
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    return close_result(frame);
                }
                // tungstenite answers pings itself; raw frames are never surfaced on read
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .close(None)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockServer, MockTransport};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::{Transport, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type Frame = Result<Option<String>, TransportError>;

    #[derive(Default)]
    struct ServerState {
        connects: usize,
        refuse_all: bool,
        fail_next: usize,
        reject_auth: bool,
        urls: Vec<String>,
        sent: Vec<String>,
        inbox: Option<mpsc::UnboundedSender<Frame>>,
    }

    /// Scripted socket server shared with the [`MockTransport`]s it creates
    ///
    /// Frames pushed from a test are delivered to the currently connected
    /// transport; frames sent by the client are captured.
    #[derive(Clone, Default)]
    pub struct MockServer {
        state: Arc<Mutex<ServerState>>,
    }

    impl MockServer {
        /// Create a server accepting all connections
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a transport connected to this server
        pub fn transport(&self) -> MockTransport {
            MockTransport {
                server: self.clone(),
                inbox: None,
            }
        }

        /// Refuse (or accept again) every connection attempt
        pub fn refuse_connections(&self, refuse: bool) {
            self.state.lock().refuse_all = refuse;
        }

        /// Refuse the next `n` connection attempts
        pub fn fail_next_connects(&self, n: usize) {
            self.state.lock().fail_next = n;
        }

        /// Answer connection attempts with HTTP 401
        pub fn reject_auth(&self, reject: bool) {
            self.state.lock().reject_auth = reject;
        }

        /// Deliver a text frame to the connected client
        ///
        /// Returns `false` if no client is connected.
        pub fn push(&self, frame: impl Into<String>) -> bool {
            self.deliver(Ok(Some(frame.into())))
        }

        /// Close the connection gracefully
        pub fn close(&self) -> bool {
            let delivered = self.deliver(Ok(None));
            self.state.lock().inbox = None;
            delivered
        }

        /// Fail the connection with a network error
        pub fn drop_connection(&self, reason: &str) -> bool {
            let delivered = self.deliver(Err(TransportError::ReceiveFailed(reason.to_string())));
            self.state.lock().inbox = None;
            delivered
        }

        /// Close the connection with an auth rejection code
        pub fn close_unauthorized(&self, reason: &str) -> bool {
            let delivered = self.deliver(Err(TransportError::Unauthorized(reason.to_string())));
            self.state.lock().inbox = None;
            delivered
        }

        /// Check if a client is connected
        pub fn is_connected(&self) -> bool {
            self.state
                .lock()
                .inbox
                .as_ref()
                .map_or(false, |inbox| !inbox.is_closed())
        }

        /// Number of connection attempts received
        pub fn connect_count(&self) -> usize {
            self.state.lock().connects
        }

        /// URLs of all connection attempts
        pub fn urls(&self) -> Vec<String> {
            self.state.lock().urls.clone()
        }

        /// Frames sent by clients so far
        pub fn sent(&self) -> Vec<String> {
            self.state.lock().sent.clone()
        }

        /// Take and clear the captured frames
        pub fn take_sent(&self) -> Vec<String> {
            std::mem::take(&mut self.state.lock().sent)
        }

        fn deliver(&self, frame: Frame) -> bool {
            match self.state.lock().inbox.as_ref() {
                Some(inbox) => inbox.send(frame).is_ok(),
                None => false,
            }
        }
    }

    /// Client side of a [`MockServer`]
    pub struct MockTransport {
        server: MockServer,
        inbox: Option<mpsc::UnboundedReceiver<Frame>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            self.inbox = None;

            let mut state = self.server.state.lock();
            state.connects += 1;
            state.urls.push(url.to_string());
            state.inbox = None;

            if state.reject_auth {
                return Err(TransportError::Unauthorized("HTTP 401 Unauthorized on upgrade".into()));
            }
            if state.refuse_all {
                return Err(TransportError::ConnectionFailed("mock connection refused".into()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::ConnectionFailed("mock connection refused".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            state.inbox = Some(tx);
            self.inbox = Some(rx);
            Ok(())
        }

        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            self.server.state.lock().sent.push(message.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            let inbox = self.inbox.as_mut().ok_or(TransportError::NotConnected)?;
            let frame = inbox.recv().await;
            match frame {
                Some(Ok(Some(text))) => Ok(Some(text)),
                Some(Ok(None)) => {
                    self.inbox = None;
                    Ok(None)
                }
                Some(Err(e)) => {
                    self.inbox = None;
                    Err(e)
                }
                None => {
                    self.inbox = None;
                    Err(TransportError::ConnectionClosed)
                }
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.inbox = None;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.inbox.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_send_recv() {
        let server = MockServer::new();
        let mut transport = server.transport();

        transport.connect("ws://mock/orders?subscriptionKey=r-1").await.unwrap();
        assert!(transport.is_connected());
        assert!(server.is_connected());

        transport.send(r#"{"type":"REFRESH"}"#).await.unwrap();
        assert_eq!(server.sent().len(), 1);

        assert!(server.push(r#"{"type":"DELETED","id":"x"}"#));
        let frame = transport.recv().await.unwrap();
        assert!(frame.unwrap().contains("DELETED"));
    }

    #[tokio::test]
    async fn test_mock_connection_failures() {
        let server = MockServer::new();
        let mut transport = server.transport();

        server.fail_next_connects(1);
        assert!(transport.connect("ws://mock").await.is_err());
        assert!(!transport.is_connected());
        assert!(transport.connect("ws://mock").await.is_ok());
        assert_eq!(server.connect_count(), 2);

        server.reject_auth(true);
        let err = transport.connect("ws://mock").await.unwrap_err();
        assert!(err.is_auth());
        assert!(!server.push("ignored"));
    }

    #[tokio::test]
    async fn test_mock_close_and_drop() {
        let server = MockServer::new();
        let mut transport = server.transport();
        transport.connect("ws://mock").await.unwrap();

        assert!(server.close());
        assert!(transport.recv().await.unwrap().is_none());
        assert!(!transport.is_connected());

        transport.connect("ws://mock").await.unwrap();
        assert!(server.drop_connection("reset by peer"));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_stream() {
        let server = MockServer::new();
        let mut transport = server.transport();
        transport.connect("ws://mock").await.unwrap();
        transport.connect("ws://mock").await.unwrap();

        // Only the latest connection receives frames
        assert!(server.push("hello"));
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_auth_close_codes() {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

        let frame = CloseFrame {
            code: CloseCode::Library(4401),
            reason: "token expired".into(),
        };
        assert!(matches!(close_result(Some(frame)), Err(TransportError::Unauthorized(_))));

        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        assert!(matches!(close_result(Some(normal)), Ok(None)));
        assert!(matches!(close_result(None), Ok(None)));
    }
}
