//! Per-channel connection state machine
//!
//! ```text
//!                start
//!  Disconnected ───────▶ Connecting ──open──▶ Connected
//!                          ▲    │                 │
//!                  backoff │    │ error/close     │ close (any reason)
//!                          │    ▼                 │
//!                        Reconnecting ◀───────────┘
//!                        (poller on)
//! ```
//!
//! `dispose()` is terminal from any state. Without a socket endpoint the
//! coordinator sits in `FallbackActive` and drives the channel by polling.

use crate::dispatcher::{Dispatch, MessageDispatcher};
use crate::endpoint::{AuthMode, SocketEndpoint};
use crate::events::{
    ConnectionEvent, DataEvent, DisconnectReason, ErrorEvent, RefreshSource, SyncEvent,
};
use crate::hooks::{ConnectInfo, Hooks};
use crate::poller::{FallbackPoller, PollFn};
use crate::reconnect::{BackoffTimer, ReconnectPolicy};
use crate::transport::{Transport, TransportError};

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tablesync_rest::EntityApi;
use tablesync_store::{MutationTicket, MutationTransport, StalePolicy, SyncStore, UpsertOutcome};
use tablesync_types::{
    AuthToken, Channel, OutboundMessage, Patch, SubscriptionKey, SyncError, SyncResult,
    SyncedEntity,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Upper bound for a graceful socket close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Coordinator connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, disposed, or stopped by an auth rejection
    Disconnected,
    /// Socket connection in progress
    Connecting,
    /// Socket open; updates are pushed
    Connected,
    /// Waiting out a backoff delay; poller active
    Reconnecting,
    /// Realtime disabled; poller is the only transport
    FallbackActive,
}

impl ConnectionState {
    /// Check if updates arrive over the socket
    pub fn is_realtime(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Lowercase state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::FallbackActive => "fallback_active",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Socket endpoint; `None` runs the channel on polling only
    pub endpoint: Option<SocketEndpoint>,
    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,
    /// Polling interval; `None` uses the channel default
    pub poll_interval: Option<Duration>,
    /// How long a socket mutation waits for its `UPDATED` echo
    pub ack_timeout: Duration,
    /// Timestamp guard for authoritative writes
    pub stale_policy: StalePolicy,
    /// Observability hooks
    pub hooks: Hooks,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            reconnect: ReconnectPolicy::default(),
            poll_interval: None,
            ack_timeout: Duration::from_secs(5),
            stale_policy: StalePolicy::default(),
            hooks: Hooks::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a polling-only config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket endpoint
    pub fn with_endpoint(mut self, endpoint: SocketEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Disable the socket
    pub fn without_realtime(mut self) -> Self {
        self.endpoint = None;
        self
    }

    /// Set reconnection policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set socket mutation ack timeout
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set stale write policy
    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Set observability hooks
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Clone)]
struct Session {
    key: SubscriptionKey,
    token: AuthToken,
}

enum Command<T> {
    Refresh,
    Mutate {
        id: String,
        patch: Patch,
        respond: oneshot::Sender<SyncResult<T>>,
    },
    Reconnect,
    Dispose,
}

/// A socket mutation waiting for its `UPDATED` echo
struct AckWaiter<T> {
    id: String,
    patch: Patch,
    ticket: MutationTicket,
    deadline: Instant,
    respond: oneshot::Sender<SyncResult<T>>,
}

/// State shared between the handle, the worker, and the poller
struct Shared<T: SyncedEntity> {
    config: CoordinatorConfig,
    api: Arc<dyn EntityApi<T>>,
    store: RwLock<SyncStore<T>>,
    state: RwLock<ConnectionState>,
    session: OnceLock<Session>,
    disposed: AtomicBool,
    auth_rejected: AtomicBool,
    rejection: Mutex<Option<String>>,
    /// Wakes the worker after a rejection seen outside the socket
    revoked: Notify,
    /// Flips to `true` once the first `start` has painted from REST
    seeded: watch::Sender<bool>,
    events: broadcast::Sender<SyncEvent<T>>,
    poller: Mutex<FallbackPoller>,
}

impl<T: SyncedEntity> Shared<T> {
    fn new(config: CoordinatorConfig, api: Arc<dyn EntityApi<T>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let stale_policy = config.stale_policy;

        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            config,
            api,
            store: RwLock::new(SyncStore::with_stale_policy(stale_policy)),
            state: RwLock::new(ConnectionState::Disconnected),
            session: OnceLock::new(),
            disposed: AtomicBool::new(false),
            auth_rejected: AtomicBool::new(false),
            rejection: Mutex::new(None),
            revoked: Notify::new(),
            seeded: watch::channel(false).0,
            events,
            poller: Mutex::new(FallbackPoller::new(poll_fn(weak.clone()))),
        })
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!("{} state {} -> {}", T::CHANNEL, previous, next);
        }
    }

    fn emit(&self, event: impl Into<SyncEvent<T>>) {
        // No subscribers is fine
        let _ = self.events.send(event.into());
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn is_auth_rejected(&self) -> bool {
        self.auth_rejected.load(Ordering::SeqCst)
    }

    fn rejection_reason(&self) -> String {
        self.rejection
            .lock()
            .clone()
            .unwrap_or_else(|| "credentials rejected".into())
    }

    fn key(&self) -> SyncResult<SubscriptionKey> {
        self.session
            .get()
            .map(|session| session.key.clone())
            .ok_or_else(|| SyncError::InvalidState {
                expected: "started".into(),
                actual: "not started".into(),
            })
    }

    fn poll_interval(&self) -> Duration {
        self.config
            .poll_interval
            .unwrap_or_else(|| T::CHANNEL.default_poll_interval())
    }

    fn start_polling(&self) {
        if self.is_auth_rejected() {
            return;
        }
        let interval = self.poll_interval();
        let started = self.poller.lock().start(interval);
        if started {
            info!("{} falling back to REST polling every {:?}", T::CHANNEL, interval);
            self.emit(ConnectionEvent::FallbackStarted { interval });
        }
    }

    fn stop_polling(&self) {
        let stopped = self.poller.lock().stop();
        if stopped {
            debug!("{} polling stopped", T::CHANNEL);
            self.emit(ConnectionEvent::FallbackStopped);
        }
    }

    /// Stop the channel for good; later calls are no-ops
    fn reject_auth(&self, reason: String) {
        if self.auth_rejected.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("{} credentials rejected: {}", T::CHANNEL, reason);
        *self.rejection.lock() = Some(reason.clone());
        self.stop_polling();
        self.set_state(ConnectionState::Disconnected);
        self.config.hooks.invoke_error(&reason);
        self.emit(ConnectionEvent::AuthRejected { reason });
        self.revoked.notify_one();
    }

    /// Replace the store with the REST list; the store is kept on failure
    async fn refresh_via_rest(&self, source: RefreshSource) -> SyncResult<usize> {
        let key = self.key()?;
        let result = self.api.list(&key).await;
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }

        match result {
            Ok(entities) => {
                let count = entities.len();
                let added = self.store.write().replace_all(entities);
                debug!("{} {:?} refresh: {} entities ({} new)", T::CHANNEL, source, count, added.len());
                self.emit(DataEvent::Replaced {
                    count,
                    added,
                    source,
                });
                Ok(count)
            }
            Err(e) => {
                let err = SyncError::from(e);
                let cached = self.store.read().len();
                warn!("{} refresh failed, keeping {} cached: {}", T::CHANNEL, cached, err);
                self.config.hooks.invoke_error(&err.to_string());
                self.emit(ErrorEvent::RefreshFailed {
                    message: err.to_string(),
                });
                if err.is_auth() {
                    self.reject_auth(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Apply a server-returned entity and return the stored state
    fn apply_authoritative(&self, entity: T) -> T {
        let id = entity.id().to_string();
        let (outcome, stored) = {
            let mut store = self.store.write();
            let outcome = store.upsert(entity.clone());
            (outcome, store.get(&id).cloned())
        };
        if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Updated) {
            self.emit(DataEvent::Updated(entity.clone()));
        }
        stored.unwrap_or(entity)
    }

    fn rollback(&self, id: &str, ticket: MutationTicket, err: &SyncError) {
        let restored = self.store.write().rollback(id, ticket);
        if let Some(entity) = restored {
            warn!("Rolled back optimistic {} mutation on {}", T::CHANNEL, id);
            self.emit(DataEvent::RolledBack(entity));
        }
        self.config.hooks.invoke_error(&err.to_string());
        self.emit(ErrorEvent::MutationRejected {
            id: id.to_string(),
            reason: err.to_string(),
        });
    }

    /// Mutation without an optimistic step
    async fn mutate_via_rest(&self, id: &str, patch: &Patch) -> SyncResult<T> {
        let key = self.key()?;
        match self.api.update(&key, id, patch).await {
            Ok(entity) => Ok(self.apply_authoritative(entity)),
            Err(e) => {
                let err = SyncError::from(e);
                warn!("{} mutation on {} rejected: {}", T::CHANNEL, id, err);
                self.config.hooks.invoke_error(&err.to_string());
                self.emit(ErrorEvent::MutationRejected {
                    id: id.to_string(),
                    reason: err.to_string(),
                });
                if err.is_auth() {
                    self.reject_auth(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Confirm an unacknowledged socket mutation over REST
    ///
    /// PATCH is idempotent, so re-sending the patch doubles as a read of the
    /// authoritative state. Failure rolls the optimistic state back.
    async fn verify_mutation(&self, waiter: AckWaiter<T>) {
        let AckWaiter {
            id,
            patch,
            ticket,
            respond,
            ..
        } = waiter;

        let result = match self.key() {
            Ok(key) => self.api.update(&key, &id, &patch).await.map_err(SyncError::from),
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(entity) => Ok(self.apply_authoritative(entity)),
            Err(err) => {
                self.rollback(&id, ticket, &err);
                if err.is_auth() {
                    self.reject_auth(err.to_string());
                }
                Err(err)
            }
        };
        let _ = respond.send(result);
    }
}

/// Marks the store as seeded when dropped, even if `start` is cancelled
struct SeedGuard<'a>(&'a watch::Sender<bool>);

impl Drop for SeedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

fn poll_fn<T: SyncedEntity>(shared: Weak<Shared<T>>) -> PollFn {
    Arc::new(move || {
        let shared = shared.clone();
        Box::pin(async move {
            if let Some(shared) = shared.upgrade() {
                // Failures are published as RefreshFailed
                let _ = shared.refresh_via_rest(RefreshSource::Poll).await;
            }
        })
    })
}

/// Keeps one channel's store in sync with the server
///
/// Cheap accessors (`snapshot`, `state`, `is_realtime`) read shared state;
/// socket I/O happens on a background worker task spawned by
/// [`start`](Self::start). Dropping the coordinator aborts the worker and
/// stops polling.
pub struct ConnectionCoordinator<T: SyncedEntity> {
    shared: Arc<Shared<T>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncedEntity> ConnectionCoordinator<T> {
    /// Create a coordinator; nothing happens until [`start`](Self::start)
    pub fn new(
        config: CoordinatorConfig,
        api: Arc<dyn EntityApi<T>>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            shared: Shared::new(config, api),
            transport: Mutex::new(Some(transport)),
            commands: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Channel this coordinator manages
    pub fn channel(&self) -> Channel {
        T::CHANNEL
    }

    /// Subscription key passed to `start`
    pub fn key(&self) -> Option<SubscriptionKey> {
        self.shared.key().ok()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if updates arrive over the socket
    pub fn is_realtime(&self) -> bool {
        self.state().is_realtime()
    }

    /// Check if the fallback poller is running
    pub fn is_polling(&self) -> bool {
        self.shared.poller.lock().is_active()
    }

    /// Check if `dispose` was called or the coordinator was dropped
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Check if the server rejected the credentials
    pub fn is_auth_rejected(&self) -> bool {
        self.shared.is_auth_rejected()
    }

    /// All entities in first-seen order
    pub fn snapshot(&self) -> Vec<T> {
        self.shared.store.read().snapshot()
    }

    /// Get an entity by id
    pub fn get(&self, id: &str) -> Option<T> {
        self.shared.store.read().get(id).cloned()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.shared.store.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.shared.store.read().is_empty()
    }

    /// Number of unconfirmed optimistic mutations
    pub fn pending_count(&self) -> usize {
        self.shared.store.read().pending_count()
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent<T>> {
        self.shared.events.subscribe()
    }

    /// Load the initial snapshot over REST, then connect the socket
    ///
    /// Returns once the snapshot is in the store (or failed); the socket
    /// connects in the background. Starting again with the same key waits
    /// for that first snapshot; a different key is an error.
    pub async fn start(&self, key: SubscriptionKey, token: AuthToken) -> SyncResult<()> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        if let Err(rejected) = self.shared.session.set(Session {
            key: key.clone(),
            token,
        }) {
            let current = self.shared.key()?;
            if rejected.key == current {
                debug!("{} coordinator already started for {}", T::CHANNEL, key);
                return self.wait_seeded().await;
            }
            return Err(SyncError::InvalidState {
                expected: format!("subscription {}", current),
                actual: format!("subscription {}", rejected.key),
            });
        }

        let realtime = self.shared.config.endpoint.is_some();
        self.shared.set_state(if realtime {
            ConnectionState::Connecting
        } else {
            ConnectionState::FallbackActive
        });
        info!("Starting {} coordinator for {}", T::CHANNEL, key);

        // Paint from REST before the socket is up
        let seeded = SeedGuard(&self.shared.seeded);
        let initial = self.shared.refresh_via_rest(RefreshSource::Initial).await;
        drop(seeded);
        if let Err(e) = initial {
            if e.is_auth() || matches!(e, SyncError::Disposed) {
                return Err(e);
            }
        }

        match self.shared.config.endpoint.clone() {
            Some(endpoint) => self.spawn_worker(endpoint),
            None => {
                if self.is_disposed() {
                    return Err(SyncError::Disposed);
                }
                self.shared.start_polling();
                Ok(())
            }
        }
    }

    async fn wait_seeded(&self) -> SyncResult<()> {
        let mut seeded = self.shared.seeded.subscribe();
        // The sender lives in `shared`, so this only ends once seeded
        let _ = seeded.wait_for(|done| *done).await;
        self.ensure_active()
    }

    fn spawn_worker(&self, endpoint: SocketEndpoint) -> SyncResult<()> {
        let mut commands = self.commands.lock();
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        let session = self.shared.session.get().cloned().ok_or(SyncError::InvalidState {
            expected: "started".into(),
            actual: "not started".into(),
        })?;
        let transport = self.transport.lock().take().ok_or(SyncError::InvalidState {
            expected: "unused transport".into(),
            actual: "transport already taken".into(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        *commands = Some(tx);

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            dispatcher: MessageDispatcher::new(self.shared.config.hooks.clone()),
            transport,
            commands: rx,
            endpoint,
            key: session.key,
            token: session.token,
            backoff: BackoffTimer::new(),
            attempt: 0,
            waiters: Vec::new(),
            connected_once: false,
        };
        *self.worker.lock() = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Bring the store up to date
    ///
    /// When connected, asks the server to resend the collection over the
    /// socket. Otherwise refreshes over REST and, if a backoff wait is
    /// pending, reconnects right away.
    pub async fn refresh(&self) -> SyncResult<()> {
        self.ensure_active()?;

        let state = self.state();
        if state == ConnectionState::Connected && self.send_command(Command::Refresh).is_ok() {
            return Ok(());
        }
        if state == ConnectionState::Reconnecting {
            let _ = self.send_command(Command::Reconnect);
        }
        self.shared.refresh_via_rest(RefreshSource::Manual).await.map(|_| ())
    }

    /// Change one entity and return its confirmed state
    ///
    /// Connected: applied optimistically and sent over the socket; resolved
    /// by the matching `UPDATED`, or after `ack_timeout` by REST
    /// verification. Otherwise: sent over REST and the server's entity is
    /// applied. A rejected mutation is rolled back.
    pub async fn mutate(&self, id: &str, patch: Patch) -> SyncResult<T> {
        self.ensure_active()?;
        if patch.is_empty() {
            return Err(SyncError::InvalidPatch {
                id: id.to_string(),
                reason: "empty patch".into(),
            });
        }

        let known = self.shared.store.read().contains(id);
        if known && self.state() == ConnectionState::Connected {
            let (respond, confirmed) = oneshot::channel();
            let command = Command::Mutate {
                id: id.to_string(),
                patch: patch.clone(),
                respond,
            };
            if self.send_command(command).is_ok() {
                return confirmed.await.unwrap_or(Err(SyncError::ChannelClosed));
            }
        }

        self.shared.mutate_via_rest(id, &patch).await
    }

    /// Tear down: stop the worker, close the socket, stop polling
    ///
    /// Safe to call from any state and more than once.
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disposing {} coordinator", T::CHANNEL);

        let commands = self.commands.lock().take();
        if let Some(commands) = commands {
            let _ = commands.send(Command::Dispose);
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    error!("{} worker panicked: {}", T::CHANNEL, e);
                }
            }
        }

        self.shared.stop_polling();
        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.emit(ConnectionEvent::Disposed);
    }

    fn ensure_active(&self) -> SyncResult<()> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        if self.shared.is_auth_rejected() {
            return Err(SyncError::AuthenticationFailed {
                reason: self.shared.rejection_reason(),
            });
        }
        self.shared.key().map(|_| ())
    }

    fn send_command(&self, command: Command<T>) -> Result<(), Command<T>> {
        match self.commands.lock().as_ref() {
            Some(commands) => commands.send(command).map_err(|e| e.0),
            None => Err(command),
        }
    }
}

impl<T: SyncedEntity> Drop for ConnectionCoordinator<T> {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
        self.shared.poller.lock().stop();
    }
}

impl<T: SyncedEntity> fmt::Debug for ConnectionCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCoordinator")
            .field("channel", &T::CHANNEL)
            .field("key", &self.key())
            .field("state", &self.state())
            .field("entities", &self.len())
            .finish()
    }
}

// ============================================================================
// Worker
// ============================================================================

enum Exit {
    Disposed,
    AuthRejected(String),
}

enum SessionEnd {
    /// Connection attempt failed
    Failed(String),
    /// An open socket went away
    Lost(DisconnectReason),
    /// Stop the worker
    Exit(Exit),
}

/// Owns the socket; the only place frames are read and dispatched
struct Worker<T: SyncedEntity> {
    shared: Arc<Shared<T>>,
    dispatcher: MessageDispatcher<T>,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command<T>>,
    endpoint: SocketEndpoint,
    key: SubscriptionKey,
    token: AuthToken,
    backoff: BackoffTimer,
    attempt: u32,
    waiters: Vec<AckWaiter<T>>,
    connected_once: bool,
}

impl<T: SyncedEntity> Worker<T> {
    async fn run(mut self) {
        let exit = loop {
            let end = match self.open().await {
                Err(exit) => SessionEnd::Exit(exit),
                Ok(Err(TransportError::Unauthorized(reason))) => {
                    SessionEnd::Exit(Exit::AuthRejected(reason))
                }
                Ok(Err(e)) => SessionEnd::Failed(e.to_string()),
                Ok(Ok(())) => match self.on_open().await {
                    Ok(()) => self.run_session().await,
                    Err(e) => SessionEnd::Lost(DisconnectReason::NetworkError(e.to_string())),
                },
            };

            match end {
                SessionEnd::Exit(exit) => break exit,
                SessionEnd::Failed(reason) => {
                    warn!("{} socket connect failed: {}", T::CHANNEL, reason);
                    self.shared.config.hooks.invoke_error(&reason);
                }
                SessionEnd::Lost(reason) => self.on_lost(reason).await,
            }

            self.schedule_reconnect();
            if let Some(exit) = self.wait_backoff().await {
                break exit;
            }
        };

        self.shutdown(exit).await;
    }

    /// Connect, serving commands offline meanwhile
    async fn open(&mut self) -> Result<Result<(), TransportError>, Exit> {
        self.shared.set_state(ConnectionState::Connecting);
        self.shared.emit(ConnectionEvent::Connecting {
            attempt: self.attempt,
        });

        let url = match self.endpoint.url(T::CHANNEL, &self.key, &self.token) {
            Ok(url) => url,
            Err(e) => return Ok(Err(TransportError::ConnectionFailed(e.to_string()))),
        };
        info!(
            "Connecting {} socket to {}",
            T::CHANNEL,
            self.endpoint.redacted_url(T::CHANNEL, &self.key)
        );

        let mut connect = self.transport.connect(&url);
        loop {
            tokio::select! {
                result = &mut connect => return Ok(result),
                _ = self.shared.revoked.notified() => {
                    return Err(Exit::AuthRejected(self.shared.rejection_reason()));
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Dispose) => return Err(Exit::Disposed),
                    Some(Command::Reconnect) => debug!("Connect already in progress"),
                    Some(other) => Self::serve_offline(&self.shared, other),
                },
            }
        }
    }

    async fn on_open(&mut self) -> Result<(), TransportError> {
        if self.endpoint.auth_mode() == AuthMode::Handshake {
            let frame = encode(OutboundMessage::Auth {
                token: self.token.expose(),
            })?;
            self.transport.send(&frame).await?;
        }

        self.shared.set_state(ConnectionState::Connected);
        self.shared.stop_polling();
        self.backoff.cancel();
        self.attempt = 0;

        let is_reconnection = self.connected_once;
        self.connected_once = true;
        info!("{} socket connected (reconnection: {})", T::CHANNEL, is_reconnection);
        self.shared.emit(ConnectionEvent::Connected { is_reconnection });
        self.shared.config.hooks.invoke_connect(&ConnectInfo {
            channel: T::CHANNEL,
            is_reconnection,
        });

        // Reconcile drift accumulated while polling
        self.send_refresh().await
    }

    async fn run_session(&mut self) -> SessionEnd {
        loop {
            let deadline = self.waiters.iter().map(|w| w.deadline).min();
            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Ok(Some(text)) => self.handle_frame(&text),
                    Ok(None) => return SessionEnd::Lost(DisconnectReason::ServerClosed),
                    Err(TransportError::Unauthorized(reason)) => {
                        return SessionEnd::Exit(Exit::AuthRejected(reason));
                    }
                    Err(e) => return SessionEnd::Lost(DisconnectReason::NetworkError(e.to_string())),
                },
                _ = self.shared.revoked.notified() => {
                    return SessionEnd::Exit(Exit::AuthRejected(self.shared.rejection_reason()));
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Dispose) => return SessionEnd::Exit(Exit::Disposed),
                    Some(Command::Refresh) => {
                        if let Err(e) = self.send_refresh().await {
                            return SessionEnd::Lost(DisconnectReason::NetworkError(e.to_string()));
                        }
                    }
                    Some(Command::Mutate { id, patch, respond }) => {
                        if let Err(e) = self.send_mutation(id, patch, respond).await {
                            return SessionEnd::Lost(DisconnectReason::NetworkError(e.to_string()));
                        }
                    }
                    Some(Command::Reconnect) => debug!("Already connected; ignoring reconnect"),
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => self.expire_waiters(),
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        self.shared.config.hooks.invoke_message(text.len());

        match self.dispatcher.dispatch(text, &self.shared.store) {
            Dispatch::Snapshot { count, added } => {
                self.shared.emit(DataEvent::Replaced {
                    count,
                    added,
                    source: RefreshSource::Socket,
                });
            }
            Dispatch::SnapshotIgnored | Dispatch::Duplicate(_) => {}
            Dispatch::Created(entity) => self.shared.emit(DataEvent::Created(entity)),
            Dispatch::Updated { entity, outcome } => {
                if outcome == UpsertOutcome::Stale {
                    return;
                }
                if matches!(outcome, UpsertOutcome::Inserted | UpsertOutcome::Updated) {
                    self.shared.emit(DataEvent::Updated(entity.clone()));
                }
                self.resolve_waiters(entity.id());
            }
            Dispatch::Deleted { id, existed } => {
                if existed {
                    self.shared.emit(DataEvent::<T>::Deleted { id: id.clone() });
                }
                let (deleted, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
                    .into_iter()
                    .partition(|w| w.id == id);
                self.waiters = pending;
                for waiter in deleted {
                    let _ = waiter.respond.send(Err(SyncError::EntityDeleted { id: id.clone() }));
                }
            }
            Dispatch::ServerError(message) => {
                self.shared.config.hooks.invoke_error(&message);
                self.shared.emit(ErrorEvent::Server { message });
            }
            Dispatch::Dropped(reason) => self.shared.emit(ErrorEvent::MalformedFrame { reason }),
        }
    }

    fn resolve_waiters(&mut self, id: &str) {
        let (confirmed, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.id == id);
        self.waiters = pending;
        if confirmed.is_empty() {
            return;
        }

        let current = self.shared.store.read().get(id).cloned();
        for waiter in confirmed {
            let result = current
                .clone()
                .ok_or_else(|| SyncError::UnknownEntity { id: id.to_string() });
            let _ = waiter.respond.send(result);
        }
    }

    async fn send_refresh(&mut self) -> Result<(), TransportError> {
        let frame = encode(OutboundMessage::Refresh {
            subscription_key: self.key.as_str(),
        })?;
        self.transport.send(&frame).await
    }

    async fn send_mutation(
        &mut self,
        id: String,
        patch: Patch,
        respond: oneshot::Sender<SyncResult<T>>,
    ) -> Result<(), TransportError> {
        let applied = self
            .shared
            .store
            .write()
            .apply_optimistic(&id, &patch, MutationTransport::Socket);
        let (optimistic, ticket) = match applied {
            Ok(applied) => applied,
            Err(SyncError::UnknownEntity { .. }) => {
                // Removed since the caller checked; let the server decide
                Self::serve_offline(&self.shared, Command::Mutate { id, patch, respond });
                return Ok(());
            }
            Err(e) => {
                let _ = respond.send(Err(e));
                return Ok(());
            }
        };
        self.shared.emit(DataEvent::Optimistic(optimistic));

        let frame = encode(OutboundMessage::Mutate {
            id: &id,
            patch: &patch,
            subscription_key: self.key.as_str(),
        });
        let waiter = AckWaiter {
            id,
            patch,
            ticket,
            deadline: Instant::now() + self.shared.config.ack_timeout,
            respond,
        };

        let sent = match frame {
            Ok(frame) => self.transport.send(&frame).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => {
                self.waiters.push(waiter);
                Ok(())
            }
            Err(e) => {
                self.spawn_verify(waiter);
                Err(e)
            }
        }
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.deadline <= now);
        self.waiters = pending;

        for waiter in expired {
            warn!(
                "No {} ack for {} within {:?}; verifying over REST",
                T::CHANNEL,
                waiter.id,
                self.shared.config.ack_timeout
            );
            self.spawn_verify(waiter);
        }
    }

    fn spawn_verify(&self, waiter: AckWaiter<T>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.verify_mutation(waiter).await });
    }

    /// Serve a command over REST while the socket is down
    fn serve_offline(shared: &Arc<Shared<T>>, command: Command<T>) {
        let shared = Arc::clone(shared);
        match command {
            Command::Refresh => {
                tokio::spawn(async move {
                    let _ = shared.refresh_via_rest(RefreshSource::Manual).await;
                });
            }
            Command::Mutate { id, patch, respond } => {
                tokio::spawn(async move {
                    let result = shared.mutate_via_rest(&id, &patch).await;
                    let _ = respond.send(result);
                });
            }
            Command::Reconnect | Command::Dispose => {}
        }
    }

    async fn on_lost(&mut self, reason: DisconnectReason) {
        warn!("{} socket lost: {:?}", T::CHANNEL, reason);
        let _ = timeout(CLOSE_TIMEOUT, self.transport.close()).await;

        self.shared.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });
        self.shared.config.hooks.invoke_disconnect(&reason);

        // The socket can no longer ack these
        for waiter in std::mem::take(&mut self.waiters) {
            self.spawn_verify(waiter);
        }
    }

    fn schedule_reconnect(&mut self) {
        self.shared.set_state(ConnectionState::Reconnecting);
        self.shared.start_polling();

        let delay = self.shared.config.reconnect.delay_with_jitter(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.backoff.arm(delay);

        info!("{} reconnecting in {:?} (attempt {})", T::CHANNEL, delay, self.attempt);
        self.shared.emit(ConnectionEvent::Reconnecting {
            attempt: self.attempt,
            delay,
        });
        self.shared
            .config
            .hooks
            .invoke_reconnect_attempt(self.attempt, delay);
    }

    /// Returns `Some` if the worker must stop
    async fn wait_backoff(&mut self) -> Option<Exit> {
        loop {
            tokio::select! {
                _ = self.backoff.fired() => return None,
                _ = self.shared.revoked.notified() => {
                    return Some(Exit::AuthRejected(self.shared.rejection_reason()));
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Dispose) => return Some(Exit::Disposed),
                    Some(Command::Reconnect) => {
                        debug!("Reconnect requested; skipping remaining backoff");
                        self.backoff.cancel();
                        return None;
                    }
                    Some(other) => Self::serve_offline(&self.shared, other),
                },
            }
        }
    }

    async fn shutdown(mut self, exit: Exit) {
        self.backoff.cancel();
        let _ = timeout(CLOSE_TIMEOUT, self.transport.close()).await;

        match exit {
            Exit::Disposed => {
                debug!("{} worker stopped", T::CHANNEL);
                for waiter in std::mem::take(&mut self.waiters) {
                    self.shared
                        .rollback(&waiter.id, waiter.ticket, &SyncError::Disposed);
                    let _ = waiter.respond.send(Err(SyncError::Disposed));
                }
                self.shared.stop_polling();
                self.shared.set_state(ConnectionState::Disconnected);
            }
            Exit::AuthRejected(reason) => {
                for waiter in std::mem::take(&mut self.waiters) {
                    let err = SyncError::AuthenticationFailed {
                        reason: reason.clone(),
                    };
                    self.shared.rollback(&waiter.id, waiter.ticket, &err);
                    let _ = waiter.respond.send(Err(err));
                }
                self.shared.reject_auth(reason);
                // A poll may have been restarted before the worker saw the rejection
                self.shared.stop_polling();
                self.shared.set_state(ConnectionState::Disconnected);
            }
        }
    }
}

fn encode(message: OutboundMessage<'_>) -> Result<String, TransportError> {
    message
        .to_json()
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockServer;
    use serde_json::{json, Value};
    use tablesync_rest::MockEntityApi;
    use tablesync_types::{Order, OrderStatus};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::sleep;

    fn order(id: &str, status: &str) -> Order {
        serde_json::from_value(json!({
            "id": id,
            "restaurantId": "rest-1",
            "status": status,
            "totalAmount": "12.00",
        }))
        .unwrap()
    }

    fn updated_frame(order: &Order) -> String {
        format!(r#"{{"type":"UPDATED","item":{}}}"#, serde_json::to_string(order).unwrap())
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("rest-1").unwrap()
    }

    fn token() -> AuthToken {
        AuthToken::new("secret-token").unwrap()
    }

    fn realtime() -> CoordinatorConfig {
        CoordinatorConfig::new().with_endpoint(SocketEndpoint::new("ws://kitchen.test/ws").unwrap())
    }

    struct Harness {
        coordinator: Arc<ConnectionCoordinator<Order>>,
        api: MockEntityApi<Order>,
        server: MockServer,
        events: broadcast::Receiver<SyncEvent<Order>>,
    }

    fn harness(config: CoordinatorConfig, orders: Vec<Order>) -> Harness {
        let api = MockEntityApi::new(orders);
        let server = MockServer::new();
        let coordinator = Arc::new(ConnectionCoordinator::new(
            config,
            Arc::new(api.clone()),
            Box::new(server.transport()),
        ));
        let events = coordinator.subscribe();
        Harness {
            coordinator,
            api,
            server,
            events,
        }
    }

    async fn next_matching(
        events: &mut broadcast::Receiver<SyncEvent<Order>>,
        mut matches: impl FnMut(&SyncEvent<Order>) -> bool,
    ) -> SyncEvent<Order> {
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

    async fn connected(h: &mut Harness) {
        h.coordinator.start(key(), token()).await.unwrap();
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Connected { .. }))
        })
        .await;
        settle().await;
    }

    /// Let spawned tasks run to their next await point
    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn sent_types(server: &MockServer) -> Vec<String> {
        server
            .take_sent()
            .iter()
            .map(|frame| {
                let value: Value = serde_json::from_str(frame).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_seeds_store_then_connects() {
        let mut h = harness(realtime(), vec![order("order-1", "pending"), order("order-2", "ready")]);

        h.coordinator.start(key(), token()).await.unwrap();
        assert_eq!(h.coordinator.len(), 2);

        let event = next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Connected { .. }))
        })
        .await;
        assert_eq!(
            event,
            SyncEvent::Connection(ConnectionEvent::Connected {
                is_reconnection: false
            })
        );
        settle().await;

        assert_eq!(h.coordinator.state(), ConnectionState::Connected);
        assert!(h.coordinator.is_realtime());
        assert!(!h.coordinator.is_polling());
        assert_eq!(sent_types(&h.server), ["AUTH", "REFRESH"]);

        let url = &h.server.urls()[0];
        assert_eq!(url, "ws://kitchen.test/ws/orders?subscriptionKey=rest-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_socket_backs_off_and_polls() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.refuse_connections(true);
        let started = Instant::now();

        h.coordinator.start(key(), token()).await.unwrap();

        let mut delays = Vec::new();
        while delays.len() < 3 {
            let event = next_matching(&mut h.events, |e| {
                matches!(e, SyncEvent::Connection(ConnectionEvent::Reconnecting { .. }))
            })
            .await;
            if let SyncEvent::Connection(ConnectionEvent::Reconnecting { delay, .. }) = event {
                delays.push(delay);
            }
        }
        assert_eq!(
            delays,
            [
                Duration::from_millis(3000),
                Duration::from_millis(4500),
                Duration::from_millis(6750)
            ]
        );
        assert!(h.coordinator.is_polling());
        assert!(!h.coordinator.is_realtime());

        tokio::time::sleep_until(started + Duration::from_millis(30_500)).await;
        // Initial snapshot plus one poll per 15s
        assert!(h.api.list_calls() >= 3);
        assert_eq!(h.coordinator.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_socket_snapshot_keeps_store() {
        let mut h = harness(realtime(), vec![order("order-1", "pending"), order("order-2", "ready")]);
        connected(&mut h).await;

        assert!(h.server.push(r#"{"type":"INITIAL_SNAPSHOT","items":[]}"#));
        assert!(h.server.push(r#"{"type":"ERROR","message":"marker"}"#));
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Error(ErrorEvent::Server { .. }))
        })
        .await;

        assert_eq!(h.coordinator.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_mutation_confirmed_by_echo() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;
        h.server.take_sent();

        let coordinator = Arc::clone(&h.coordinator);
        let pending =
            tokio::spawn(async move { coordinator.mutate("order-1", Patch::status("ready")).await });

        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::Optimistic(_)))).await;
        assert_eq!(h.coordinator.get("order-1").unwrap().status, OrderStatus::Ready);
        assert_eq!(h.coordinator.pending_count(), 1);
        settle().await;

        let sent = h.server.take_sent();
        assert_eq!(sent.len(), 1);
        let frame: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(frame["type"], "MUTATE");
        assert_eq!(frame["id"], "order-1");
        assert_eq!(frame["patch"]["status"], "ready");

        assert!(h.server.push(updated_frame(&order("order-1", "ready"))));
        let confirmed = pending.await.unwrap().unwrap();
        assert_eq!(confirmed.status, OrderStatus::Ready);
        assert_eq!(h.coordinator.pending_count(), 0);
        assert!(h.api.update_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_echo_wins_over_optimistic_state() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        let coordinator = Arc::clone(&h.coordinator);
        let pending =
            tokio::spawn(async move { coordinator.mutate("order-1", Patch::status("ready")).await });
        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::Optimistic(_)))).await;

        assert!(h.server.push(updated_frame(&order("order-1", "preparing"))));
        let confirmed = pending.await.unwrap().unwrap();
        assert_eq!(confirmed.status, OrderStatus::Preparing);
        assert_eq!(h.coordinator.get("order-1").unwrap().status, OrderStatus::Preparing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_mutation_is_verified_over_rest() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        let started = Instant::now();
        let confirmed = h
            .coordinator
            .mutate("order-1", Patch::status("ready"))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(confirmed.status, OrderStatus::Ready);
        let calls = h.api.update_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "order-1");
        assert_eq!(h.coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_mutation_rolls_back() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;
        h.api.fail_next_updates(1);

        let result = h.coordinator.mutate("order-1", Patch::status("ready")).await;
        assert!(result.is_err());

        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::RolledBack(_)))).await;
        assert_eq!(h.coordinator.get("order-1").unwrap().status, OrderStatus::Pending);
        assert_eq!(h.coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_entity_fails_pending_mutation() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        let coordinator = Arc::clone(&h.coordinator);
        let pending =
            tokio::spawn(async move { coordinator.mutate("order-1", Patch::status("ready")).await });
        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::Optimistic(_)))).await;

        assert!(h.server.push(r#"{"type":"DELETED","id":"order-1"}"#));
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SyncError::EntityDeleted { .. })));
        assert!(h.coordinator.get("order-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_starts_polling_and_reconnects() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;
        h.server.take_sent();

        assert!(h.server.close());
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Reconnecting { attempt: 1, .. }))
        })
        .await;
        assert_eq!(h.coordinator.state(), ConnectionState::Reconnecting);
        assert!(h.coordinator.is_polling());

        let lost_at = Instant::now();
        next_matching(&mut h.events, |e| {
            matches!(
                e,
                SyncEvent::Connection(ConnectionEvent::Connected {
                    is_reconnection: true
                })
            )
        })
        .await;
        settle().await;

        assert!(lost_at.elapsed() >= Duration::from_millis(3000));
        assert!(!h.coordinator.is_polling());
        assert_eq!(h.server.connect_count(), 2);
        assert_eq!(sent_types(&h.server), ["AUTH", "REFRESH"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_while_disconnected_uses_rest() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.refuse_connections(true);
        h.coordinator.start(key(), token()).await.unwrap();
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Reconnecting { .. }))
        })
        .await;

        let confirmed = h
            .coordinator
            .mutate("order-1", Patch::status("ready"))
            .await
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Ready);
        assert_eq!(h.api.update_calls().len(), 1);
        assert!(h.server.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_on_connect_is_terminal() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.reject_auth(true);

        h.coordinator.start(key(), token()).await.unwrap();
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::AuthRejected { .. }))
        })
        .await;

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert!(h.coordinator.is_auth_rejected());
        assert!(!h.coordinator.is_polling());
        assert_eq!(h.server.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_close_mid_session_is_terminal() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        assert!(h.server.close_unauthorized("token revoked"));
        let event = next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::AuthRejected { .. }))
        })
        .await;
        assert_eq!(
            event,
            SyncEvent::Connection(ConnectionEvent::AuthRejected {
                reason: "token revoked".into()
            })
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert!(!h.coordinator.is_polling());
        assert_eq!(h.server.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_rest_auth_failure_stops_start() {
        let h = harness(realtime(), vec![]);
        h.api.set_unauthorized(true);

        let err = h.coordinator.start(key(), token()).await.unwrap_err();
        assert!(err.is_auth());
        assert!(h.coordinator.is_auth_rejected());
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert_eq!(h.server.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_auth_failure_stops_polling_and_reconnects() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.refuse_connections(true);
        h.coordinator.start(key(), token()).await.unwrap();
        settle().await;
        assert!(h.coordinator.is_polling());

        h.api.set_unauthorized(true);
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::AuthRejected { .. }))
        })
        .await;
        settle().await;

        assert!(h.coordinator.is_auth_rejected());
        assert!(!h.coordinator.is_polling());
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert_eq!(h.coordinator.len(), 1);

        let connects = h.server.connect_count();
        let lists = h.api.list_calls();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(h.server.connect_count(), connects);
        assert_eq!(h.api.list_calls(), lists);

        let err = h
            .coordinator
            .mutate("order-1", Patch::status("ready"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(h.api.update_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rest_mutation_auth_failure_is_terminal() {
        let h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.refuse_connections(true);
        h.coordinator.start(key(), token()).await.unwrap();
        settle().await;

        h.api.set_unauthorized(true);
        let err = h
            .coordinator
            .mutate("order-1", Patch::status("ready"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        settle().await;

        assert!(h.coordinator.is_auth_rejected());
        assert!(!h.coordinator.is_polling());
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert_eq!(h.coordinator.get("order-1").unwrap().status, OrderStatus::Pending);

        let connects = h.server.connect_count();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.server.connect_count(), connects);
        assert_eq!(h.api.list_calls(), 1);
        assert!(matches!(
            h.coordinator.refresh().await,
            Err(SyncError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_rolls_back_pending_mutation() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        let coordinator = Arc::clone(&h.coordinator);
        let pending =
            tokio::spawn(async move { coordinator.mutate("order-1", Patch::status("ready")).await });
        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::Optimistic(_)))).await;
        assert_eq!(h.coordinator.pending_count(), 1);

        h.coordinator.dispose().await;

        assert!(matches!(pending.await.unwrap(), Err(SyncError::Disposed)));
        assert_eq!(h.coordinator.get("order-1").unwrap().status, OrderStatus::Pending);
        assert_eq!(h.coordinator.pending_count(), 0);
        next_matching(&mut h.events, |e| matches!(e, SyncEvent::Data(DataEvent::RolledBack(_)))).await;
        // Never sent over REST
        assert!(h.api.update_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_idempotent() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;

        h.coordinator.dispose().await;
        h.coordinator.dispose().await;

        assert!(h.coordinator.is_disposed());
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert!(!h.coordinator.is_polling());
        assert!(!h.server.is_connected());

        let mut disposed = 0;
        while let Ok(event) = h.events.try_recv() {
            if event == SyncEvent::Connection(ConnectionEvent::Disposed) {
                disposed += 1;
            }
        }
        assert_eq!(disposed, 1);

        assert!(matches!(
            h.coordinator.mutate("order-1", Patch::status("ready")).await,
            Err(SyncError::Disposed)
        ));
        assert!(matches!(h.coordinator.refresh().await, Err(SyncError::Disposed)));
        assert!(matches!(
            h.coordinator.start(key(), token()).await,
            Err(SyncError::Disposed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_before_start() {
        let h = harness(realtime(), vec![]);
        h.coordinator.dispose().await;
        assert_eq!(h.coordinator.state(), ConnectionState::Disconnected);
        assert_eq!(h.server.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_store() {
        let mut h = harness(CoordinatorConfig::new(), vec![order("order-1", "pending")]);
        h.coordinator.start(key(), token()).await.unwrap();
        h.api.fail_next_lists(1);

        assert!(h.coordinator.refresh().await.is_err());
        assert_eq!(h.coordinator.len(), 1);
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Error(ErrorEvent::RefreshFailed { .. }))
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_when_connected_asks_the_socket() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        connected(&mut h).await;
        h.server.take_sent();

        h.coordinator.refresh().await.unwrap();
        settle().await;

        assert_eq!(sent_types(&h.server), ["REFRESH"]);
        assert_eq!(h.api.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_during_backoff_reconnects_now() {
        let mut h = harness(realtime(), vec![order("order-1", "pending")]);
        h.server.refuse_connections(true);
        h.coordinator.start(key(), token()).await.unwrap();
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Reconnecting { .. }))
        })
        .await;

        h.server.refuse_connections(false);
        let nudged_at = Instant::now();
        h.coordinator.refresh().await.unwrap();
        next_matching(&mut h.events, |e| {
            matches!(e, SyncEvent::Connection(ConnectionEvent::Connected { .. }))
        })
        .await;

        assert!(nudged_at.elapsed() < Duration::from_millis(3000));
        assert_eq!(h.api.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_disabled_polls_only() {
        let config = CoordinatorConfig::new().with_poll_interval(Duration::from_secs(10));
        let h = harness(config, vec![order("order-1", "pending")]);

        h.coordinator.start(key(), token()).await.unwrap();
        assert_eq!(h.coordinator.state(), ConnectionState::FallbackActive);
        assert!(h.coordinator.is_polling());

        sleep(Duration::from_millis(25_000)).await;
        assert_eq!(h.api.list_calls(), 3);
        assert_eq!(h.server.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice() {
        let h = harness(CoordinatorConfig::new(), vec![]);

        h.coordinator.start(key(), token()).await.unwrap();
        h.coordinator.start(key(), token()).await.unwrap();
        assert_eq!(h.api.list_calls(), 1);

        let other = SubscriptionKey::new("rest-2").unwrap();
        assert!(matches!(
            h.coordinator.start(other, token()).await,
            Err(SyncError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::new()
            .with_poll_interval(Duration::from_secs(5))
            .with_ack_timeout(Duration::from_secs(2))
            .with_stale_policy(StalePolicy::NewerOnly);
        assert!(config.endpoint.is_none());
        assert_eq!(config.poll_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.ack_timeout, Duration::from_secs(2));
        assert_eq!(ConnectionState::FallbackActive.to_string(), "fallback_active");
    }
}
