//! # Connection Manager
//!
//! Owns at most one push channel per ride and the observers sharing it.
//!
//! ## Lifecycle
//!
//! ```text
//! connect(ride, A) ──> entry created, session task spawned
//! connect(ride, B) ──> B joins the entry (no network activity)
//!                      session task: resolve token -> open -> ride:subscribe
//!                                    Open      -> Connected to all, attempts = 0
//!                                    Frame     -> state machine -> fan-out
//!                                    Closed    -> Disconnected -> backoff -> reopen
//!                                                 (not once the ride ended or timed out)
//! disconnect(ride, A) ──> B remains, channel stays open
//! disconnect(ride, B) ──> ride:unsubscribe, close, entry removed, guard disarmed
//! ```
//!
//! ## Concurrency
//!
//! All per-ride state lives in one map behind an async mutex. The entry is
//! inserted before credentials are resolved, so a second `connect` during
//! that suspension joins the in-flight session instead of opening another
//! channel. Fan-out happens under the lock: every current observer receives an
//! event before a subscribe or unsubscribe issued in reaction to it applies.
//!
//! Each session task re-checks its session id under the lock after every
//! suspension point, and teardown cancels the session's token, so no deferred
//! work runs against a removed entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{
    Clock, PushChannel, PushChannelRequest, PushCommand, PushFrame, PushSignal, PushTransport,
    SystemClock,
};
use chrono::{DateTime, Utc};
use core_auth::CredentialProvider;
use core_runtime::config::DEFAULT_TOKEN_KEY;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, TrackingEvent};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::{ReconnectDecision, ReconnectPolicy};
use crate::error::TrackingError;
use crate::observer::{Observer, ObserverHandle, ObserverId, RideEvent};
use crate::protocol::{self, InboundEvent};
use crate::registry::ObserverSet;
use crate::state::{RideStateMachine, RideUpdate};
use crate::timeout::TimeoutGuard;
use crate::types::{RideId, RideSnapshot, RideStatus};

/// Where ride channels are opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEndpoint {
    pub url: String,
    pub namespace: String,
}

impl PushEndpoint {
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
        }
    }
}

/// Identifies one tracking session of a ride (entry creation to teardown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId(u64);

/// Handed to the caller that created or restarted a session.
#[derive(Debug, Clone)]
pub(crate) struct SessionStart {
    pub session: SessionId,
    /// Cancelled on teardown.
    pub cancel: CancellationToken,
    /// An abandoned session was reopened rather than a new one created.
    pub restarted: bool,
}

pub(crate) struct Attachment {
    pub handle: ObserverHandle,
    pub started: Option<SessionStart>,
}

/// Point-in-time view of a ride used to detect newer updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    pub session: SessionId,
    pub revision: u64,
}

/// Public view of a ride's connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<TrackingError>,
    /// Reconnects were exhausted; a new `connect` restarts from zero.
    pub abandoned: bool,
    pub observers: usize,
    pub status: RideStatus,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ConnectionState {
    outbound: Option<mpsc::UnboundedSender<PushCommand>>,
    connected: bool,
    reconnect_attempts: u32,
    last_error: Option<TrackingError>,
    abandoned: bool,
    last_event_at: Option<DateTime<Utc>>,
}

struct RideEntry {
    session: SessionId,
    observers: ObserverSet,
    machine: RideStateMachine,
    connection: ConnectionState,
    cancel: CancellationToken,
}

/// How a channel ended.
#[derive(Debug)]
enum ChannelExit {
    /// The session was superseded or torn down while opening.
    Local,
    Closed(String),
    Rejected(String),
    Failed(TrackingError),
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: PushEndpoint,
    policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
    credential_key: String,
    timeout_guard: TimeoutGuard,
    rides: Mutex<HashMap<RideId, RideEntry>>,
    next_session: AtomicU64,
}

// ============================================================================
// Builder
// ============================================================================

pub struct ConnectionManagerBuilder {
    transport: Arc<dyn PushTransport>,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: PushEndpoint,
    policy: ReconnectPolicy,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
    credential_key: Option<String>,
}

impl ConnectionManagerBuilder {
    /// Default: 1s base, 30s cap, 5 attempts
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default: `SystemClock`
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Diagnostics bus. Default: a private bus nobody listens to.
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Secure store key reported when credential lookup fails.
    ///
    /// Default: `auth_token`
    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = Some(key.into());
        self
    }

    pub fn build(self) -> ConnectionManager {
        ConnectionManager {
            inner: Arc::new(Inner {
                transport: self.transport,
                credentials: self.credentials,
                endpoint: self.endpoint,
                policy: self.policy,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                events: self.events.unwrap_or_default(),
                credential_key: self
                    .credential_key
                    .unwrap_or_else(|| DEFAULT_TOKEN_KEY.to_string()),
                timeout_guard: TimeoutGuard::new(),
                rides: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

/// Registry of ride channels. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl ConnectionManager {
    pub fn builder(
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialProvider>,
        endpoint: PushEndpoint,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            transport,
            credentials,
            endpoint,
            policy: ReconnectPolicy::default(),
            clock: None,
            events: None,
            credential_key: None,
        }
    }

    /// Guard disarmed whenever a ride leaves `PENDING` and on teardown.
    pub fn timeout_guard(&self) -> &TimeoutGuard {
        &self.inner.timeout_guard
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Register `observer` for `ride_id`, opening the ride's channel if this
    /// is its first observer.
    ///
    /// Never fails: connectivity problems arrive on the observer's stream.
    pub async fn connect(&self, ride_id: impl Into<RideId>, observer: Observer) -> ObserverHandle {
        self.attach(ride_id.into(), observer).await.handle
    }

    #[instrument(skip(self, observer), fields(ride_id = %ride_id, observer_id = %observer.id()))]
    pub(crate) async fn attach(&self, ride_id: RideId, observer: Observer) -> Attachment {
        let observer_id = observer.id();
        let handle = ObserverHandle::new(ride_id.clone(), observer_id);
        let mut rides = self.inner.rides.lock().await;

        if let Some(entry) = rides.get_mut(&ride_id) {
            if entry.observers.insert(observer) {
                debug!(observers = entry.observers.len(), "Observer joined existing session");
                if entry.connection.connected {
                    entry.observers.send_to(observer_id, RideEvent::Connected);
                }
                if let Some(ride) = entry.machine.ride() {
                    entry
                        .observers
                        .send_to(observer_id, RideEvent::RideUpdated(ride.clone()));
                }
            }

            let mut started = None;
            if entry.connection.abandoned {
                info!("Restarting abandoned session");
                entry.connection.abandoned = false;
                entry.connection.reconnect_attempts = 0;
                entry.connection.last_error = None;
                self.spawn_session(ride_id, entry.session, entry.cancel.clone());
                started = Some(SessionStart {
                    session: entry.session,
                    cancel: entry.cancel.clone(),
                    restarted: true,
                });
            }

            return Attachment { handle, started };
        }

        let session = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let mut observers = ObserverSet::new();
        observers.insert(observer);

        rides.insert(
            ride_id.clone(),
            RideEntry {
                session,
                observers,
                machine: RideStateMachine::new(),
                connection: ConnectionState::default(),
                cancel: cancel.clone(),
            },
        );
        self.spawn_session(ride_id.clone(), session, cancel.clone());
        drop(rides);

        info!("Ride tracking session started");
        self.emit(TrackingEvent::SessionStarted {
            ride_id: ride_id.to_string(),
        });

        Attachment {
            handle,
            started: Some(SessionStart {
                session,
                cancel,
                restarted: false,
            }),
        }
    }

    /// Remove `observer` from the ride; the last one out tears the session
    /// down. `None` tears down regardless of remaining observers.
    ///
    /// Unknown rides and unregistered observers are no-ops.
    #[instrument(skip(self), fields(ride_id = %ride_id))]
    pub async fn disconnect(&self, ride_id: &RideId, observer: Option<ObserverId>) {
        let mut rides = self.inner.rides.lock().await;
        let Some(entry) = rides.get_mut(ride_id) else {
            debug!("Disconnect for untracked ride");
            return;
        };

        if let Some(observer_id) = observer {
            if !entry.observers.remove(observer_id) {
                debug!(observer_id = %observer_id, "Observer was not registered");
                return;
            }
            entry.observers.prune_closed();
            if !entry.observers.is_empty() {
                debug!(observers = entry.observers.len(), "Observer left, channel kept");
                return;
            }
        }

        self.teardown_locked(&mut rides, ride_id);
    }

    /// Tear down every session.
    pub async fn shutdown(&self) {
        let mut rides = self.inner.rides.lock().await;
        let ride_ids: Vec<RideId> = rides.keys().cloned().collect();
        for ride_id in ride_ids {
            self.teardown_locked(&mut rides, &ride_id);
        }
        info!("All ride tracking sessions shut down");
    }

    /// Emit `frame` on the ride's channel. Returns `false` when not connected.
    pub async fn send(&self, ride_id: &RideId, frame: PushFrame) -> bool {
        let rides = self.inner.rides.lock().await;
        let Some(connection) = rides.get(ride_id).map(|entry| &entry.connection) else {
            return false;
        };
        match (&connection.outbound, connection.connected) {
            (Some(outbound), true) => outbound.send(PushCommand::Emit(frame)).is_ok(),
            _ => false,
        }
    }

    pub async fn is_connected(&self, ride_id: &RideId) -> bool {
        let rides = self.inner.rides.lock().await;
        rides
            .get(ride_id)
            .map(|entry| entry.connection.connected)
            .unwrap_or(false)
    }

    pub async fn is_tracking(&self, ride_id: &RideId) -> bool {
        self.inner.rides.lock().await.contains_key(ride_id)
    }

    /// Number of rides with a live session.
    pub async fn session_count(&self) -> usize {
        self.inner.rides.lock().await.len()
    }

    pub async fn observer_count(&self, ride_id: &RideId) -> usize {
        let rides = self.inner.rides.lock().await;
        rides
            .get(ride_id)
            .map(|entry| entry.observers.len())
            .unwrap_or(0)
    }

    pub async fn connection_snapshot(&self, ride_id: &RideId) -> Option<ConnectionSnapshot> {
        let rides = self.inner.rides.lock().await;
        rides.get(ride_id).map(|entry| ConnectionSnapshot {
            connected: entry.connection.connected,
            reconnect_attempts: entry.connection.reconnect_attempts,
            last_error: entry.connection.last_error.clone(),
            abandoned: entry.connection.abandoned,
            observers: entry.observers.len(),
            status: entry.machine.status(),
            last_event_at: entry.connection.last_event_at,
        })
    }

    pub async fn status(&self, ride_id: &RideId) -> Option<RideStatus> {
        let rides = self.inner.rides.lock().await;
        rides.get(ride_id).map(|entry| entry.machine.status())
    }

    /// Latest ride snapshot received for the session.
    pub async fn ride_snapshot(&self, ride_id: &RideId) -> Option<RideSnapshot> {
        let rides = self.inner.rides.lock().await;
        rides
            .get(ride_id)
            .and_then(|entry| entry.machine.ride().cloned())
    }

    // ------------------------------------------------------------------------
    // Hooks for the tracker
    // ------------------------------------------------------------------------

    pub(crate) async fn is_current(&self, ride_id: &RideId, session: SessionId) -> bool {
        let rides = self.inner.rides.lock().await;
        rides
            .get(ride_id)
            .is_some_and(|entry| entry.session == session)
    }

    /// Whether the tracked ride is still waiting for a driver.
    pub(crate) async fn awaiting_driver(&self, ride_id: &RideId) -> bool {
        let rides = self.inner.rides.lock().await;
        rides.get(ride_id).is_some_and(|entry| {
            entry.machine.status() == RideStatus::Pending && !entry.machine.is_sealed()
        })
    }

    pub(crate) async fn checkpoint(&self, ride_id: &RideId) -> Option<Checkpoint> {
        let rides = self.inner.rides.lock().await;
        rides.get(ride_id).map(|entry| Checkpoint {
            session: entry.session,
            revision: entry.machine.revision(),
        })
    }

    /// Feed a fetched snapshot into the state machine if nothing newer arrived
    /// since `checkpoint`. Returns whether it was applied.
    pub(crate) async fn reconcile(&self, ride_id: &RideId, checkpoint: Checkpoint, ride: RideSnapshot) -> bool {
        let mut rides = self.inner.rides.lock().await;
        let Some(entry) = rides.get_mut(ride_id) else {
            debug!(ride_id = %ride_id, "Discarding fetched ride: no longer tracked");
            return false;
        };
        if entry.session != checkpoint.session {
            debug!(ride_id = %ride_id, "Discarding fetched ride: session replaced");
            return false;
        }
        if entry.machine.revision() != checkpoint.revision {
            debug!(ride_id = %ride_id, "Discarding fetched ride: push delivered newer state");
            return false;
        }

        let applied = self.apply_locked(ride_id, entry, RideUpdate::Snapshot(ride), None);
        if applied {
            self.settle_locked(&mut rides, ride_id);
        }
        applied
    }

    /// Deliver the match timeout if the ride is still waiting for a driver.
    /// Seals the session's state machine: later progress is discarded, a
    /// terminal status still goes through. Returns whether it was delivered.
    pub(crate) async fn expire_match(&self, ride_id: &RideId, session: SessionId, waited: Duration) -> bool {
        let mut rides = self.inner.rides.lock().await;
        let Some(entry) = rides.get_mut(ride_id).filter(|entry| entry.session == session) else {
            debug!(ride_id = %ride_id, "Ignoring match timeout for ended session");
            return false;
        };
        if entry.machine.status() != RideStatus::Pending || entry.machine.is_sealed() {
            debug!(ride_id = %ride_id, status = %entry.machine.status(), "Ignoring stale match timeout");
            return false;
        }

        entry.machine.seal();
        entry.observers.broadcast(&RideEvent::MatchTimeout { waited });
        warn!(ride_id = %ride_id, timeout_ms = waited.as_millis() as u64, "No driver assigned in time");
        self.emit(TrackingEvent::MatchTimeout {
            ride_id: ride_id.to_string(),
            timeout_ms: waited.as_millis() as u64,
        });
        self.settle_locked(&mut rides, ride_id);
        true
    }

    // ------------------------------------------------------------------------
    // Session task
    // ------------------------------------------------------------------------

    fn spawn_session(&self, ride_id: RideId, session: SessionId, cancel: CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_session(ride_id, session, cancel).await;
        });
    }

    #[instrument(skip(self, cancel), fields(ride_id = %ride_id, session = session.0))]
    async fn run_session(&self, ride_id: RideId, session: SessionId, cancel: CancellationToken) {
        loop {
            let exit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                exit = self.open_and_pump(&ride_id, session) => exit,
            };

            let Some(delay) = self.handle_exit(&ride_id, session, exit).await else {
                return;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            debug!("Reconnecting");
        }
    }

    async fn resolve_token(&self, ride_id: &RideId) -> Option<String> {
        match self.inner.credentials.bearer_token().await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                debug!(ride_id = %ride_id, "No session token; connecting anonymously");
                None
            }
            Err(e) => {
                warn!(ride_id = %ride_id, error = %e, "Credential lookup failed; connecting anonymously");
                self.inner
                    .events
                    .emit(CoreEvent::Auth(AuthEvent::CredentialUnavailable {
                        key: self.inner.credential_key.clone(),
                        reason: e.to_string(),
                    }))
                    .ok();
                None
            }
        }
    }

    async fn open_and_pump(&self, ride_id: &RideId, session: SessionId) -> ChannelExit {
        let request = PushChannelRequest {
            url: self.inner.endpoint.url.clone(),
            namespace: self.inner.endpoint.namespace.clone(),
            auth_token: self.resolve_token(ride_id).await,
        };

        let PushChannel {
            outbound,
            mut inbound,
        } = match self.inner.transport.open(request).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(ride_id = %ride_id, error = %e, "Failed to open push channel");
                return ChannelExit::Failed(TrackingError::transport(e.to_string()));
            }
        };

        if !self.install_channel(ride_id, session, outbound.clone()).await {
            let _ = outbound.send(PushCommand::Close);
            return ChannelExit::Local;
        }
        let _ = outbound.send(PushCommand::Emit(protocol::subscribe_frame(ride_id)));
        debug!(ride_id = %ride_id, "Subscribe intent sent");

        loop {
            match inbound.recv().await {
                Some(PushSignal::Open) => self.on_open(ride_id, session).await,
                Some(PushSignal::Frame(frame)) => self.on_frame(ride_id, session, frame).await,
                Some(PushSignal::Closed { reason }) => return ChannelExit::Closed(reason),
                Some(PushSignal::ConnectError { message }) => return ChannelExit::Rejected(message),
                None => return ChannelExit::Closed("transport dropped".to_string()),
            }
        }
    }

    async fn install_channel(
        &self,
        ride_id: &RideId,
        session: SessionId,
        outbound: mpsc::UnboundedSender<PushCommand>,
    ) -> bool {
        let mut rides = self.inner.rides.lock().await;
        match rides.get_mut(ride_id) {
            Some(entry) if entry.session == session && !entry.cancel.is_cancelled() => {
                entry.connection.outbound = Some(outbound);
                true
            }
            _ => false,
        }
    }

    async fn on_open(&self, ride_id: &RideId, session: SessionId) {
        let mut rides = self.inner.rides.lock().await;
        let Some(entry) = rides.get_mut(ride_id).filter(|entry| entry.session == session) else {
            return;
        };

        entry.connection.connected = true;
        entry.connection.reconnect_attempts = 0;
        entry.connection.last_error = None;
        entry.connection.last_event_at = Some(self.inner.clock.now());
        entry.observers.broadcast(&RideEvent::Connected);

        info!(ride_id = %ride_id, observers = entry.observers.len(), "Push channel connected");
        self.emit(TrackingEvent::Connected {
            ride_id: ride_id.to_string(),
        });
        self.settle_locked(&mut rides, ride_id);
    }

    async fn on_frame(&self, ride_id: &RideId, session: SessionId, frame: PushFrame) {
        let mut rides = self.inner.rides.lock().await;
        let Some(entry) = rides.get_mut(ride_id).filter(|entry| entry.session == session) else {
            return;
        };
        entry.connection.last_event_at = Some(self.inner.clock.now());

        match protocol::decode(ride_id, &frame) {
            Ok(InboundEvent::Update(update)) => {
                self.apply_locked(ride_id, entry, update, Some(frame));
            }
            Ok(InboundEvent::Subscribed) => {
                debug!(ride_id = %ride_id, "Ride subscription acknowledged");
                entry.observers.broadcast(&RideEvent::Message(frame));
            }
            Ok(InboundEvent::ServerError(message)) => {
                warn!(ride_id = %ride_id, error = %message, "Server reported an error");
                let error = TrackingError::server(message);
                entry.connection.last_error = Some(error.clone());
                entry.observers.broadcast(&RideEvent::Error(error));
            }
            Ok(InboundEvent::Other) => {
                entry.observers.broadcast(&RideEvent::Message(frame));
            }
            Err(error) => {
                warn!(ride_id = %ride_id, error = %error, "Dropping malformed ride event");
                entry.observers.broadcast(&RideEvent::Error(error));
            }
        }

        self.settle_locked(&mut rides, ride_id);
    }

    /// Run an update through the state machine and fan out what it produced.
    fn apply_locked(
        &self,
        ride_id: &RideId,
        entry: &mut RideEntry,
        update: RideUpdate,
        raw: Option<PushFrame>,
    ) -> bool {
        let Some(events) = entry.machine.apply(update) else {
            debug!(ride_id = %ride_id, status = %entry.machine.status(), "Ride update discarded");
            return false;
        };

        for event in events {
            if let RideEvent::StatusChanged { previous, status } = &event {
                info!(ride_id = %ride_id, from = %previous, to = %status, "Ride status changed");
                self.emit(TrackingEvent::StatusChanged {
                    ride_id: ride_id.to_string(),
                    status: status.to_string(),
                });
            }
            entry.observers.broadcast(&event);
        }
        if let Some(frame) = raw {
            entry.observers.broadcast(&RideEvent::Message(frame));
        }

        if entry.machine.status() != RideStatus::Pending {
            self.inner.timeout_guard.disarm(ride_id);
        }
        true
    }

    /// Record how the channel ended and decide whether to reconnect.
    async fn handle_exit(&self, ride_id: &RideId, session: SessionId, exit: ChannelExit) -> Option<Duration> {
        let mut rides = self.inner.rides.lock().await;
        let entry = rides.get_mut(ride_id).filter(|entry| entry.session == session)?;

        entry.connection.outbound = None;
        entry.connection.connected = false;

        match exit {
            ChannelExit::Local => return None,
            ChannelExit::Closed(reason) => {
                warn!(ride_id = %ride_id, reason = %reason, "Push channel disconnected");
                entry.connection.last_error = Some(TrackingError::transport(reason.clone()));
                entry
                    .observers
                    .broadcast(&RideEvent::Disconnected { reason: reason.clone() });
                self.emit(TrackingEvent::Disconnected {
                    ride_id: ride_id.to_string(),
                    reason,
                });
            }
            ChannelExit::Rejected(message) => {
                let error = TrackingError::from_rejection(message);
                warn!(ride_id = %ride_id, error = %error, "Push channel rejected");
                entry.connection.last_error = Some(error.clone());
                entry.observers.broadcast(&RideEvent::Error(error));
            }
            ChannelExit::Failed(error) => {
                entry.connection.last_error = Some(error.clone());
                entry.observers.broadcast(&RideEvent::Error(error));
            }
        }

        entry.observers.prune_closed();
        if entry.observers.is_empty() {
            self.teardown_locked(&mut rides, ride_id);
            return None;
        }

        if entry.machine.is_closed() {
            info!(
                ride_id = %ride_id,
                status = %entry.machine.status(),
                sealed = entry.machine.is_sealed(),
                "Ride no longer progressing; not reconnecting"
            );
            return None;
        }

        match self.inner.policy.next(entry.connection.reconnect_attempts) {
            ReconnectDecision::Retry { attempt, delay } => {
                entry.connection.reconnect_attempts = attempt;
                info!(
                    ride_id = %ride_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.emit(TrackingEvent::ReconnectScheduled {
                    ride_id: ride_id.to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                Some(delay)
            }
            ReconnectDecision::Exhausted { attempts } => {
                let error = TrackingError::reconnect_exhausted(attempts);
                error!(ride_id = %ride_id, attempts, "Reconnect attempts exhausted");
                entry.connection.abandoned = true;
                entry.connection.last_error = Some(error.clone());
                entry.observers.broadcast(&RideEvent::Error(error));
                self.emit(TrackingEvent::ReconnectExhausted {
                    ride_id: ride_id.to_string(),
                    attempts,
                });
                None
            }
        }
    }

    /// Tear the session down once every observer's stream has been dropped.
    fn settle_locked(&self, rides: &mut HashMap<RideId, RideEntry>, ride_id: &RideId) {
        let empty = match rides.get_mut(ride_id) {
            Some(entry) => {
                entry.observers.prune_closed();
                entry.observers.is_empty()
            }
            None => false,
        };
        if empty {
            debug!(ride_id = %ride_id, "All observer streams dropped");
            self.teardown_locked(rides, ride_id);
        }
    }

    fn teardown_locked(&self, rides: &mut HashMap<RideId, RideEntry>, ride_id: &RideId) {
        let Some(entry) = rides.remove(ride_id) else {
            return;
        };

        if let Some(outbound) = &entry.connection.outbound {
            let _ = outbound.send(PushCommand::Emit(protocol::unsubscribe_frame(ride_id)));
            let _ = outbound.send(PushCommand::Close);
        }
        entry.cancel.cancel();
        self.inner.timeout_guard.disarm(ride_id);

        info!(ride_id = %ride_id, "Ride tracking session ended");
        self.emit(TrackingEvent::SessionEnded {
            ride_id: ride_id.to_string(),
        });
    }

    fn emit(&self, event: TrackingEvent) {
        self.inner.events.emit(CoreEvent::Tracking(event)).ok();
    }
}
