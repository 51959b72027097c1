//! # Ride Tracker
//!
//! Entry point for screens that need live ride state. Composes the
//! [`ConnectionManager`] with the driver-match [`TimeoutGuard`](crate::timeout::TimeoutGuard)
//! and the [`FallbackPoller`]:
//!
//! - the first observer of a ride opens its channel, arms the match timeout
//!   and schedules the fallback fetch;
//! - a tracking request for a ride whose reconnects ran out reopens the
//!   channel and schedules a new fallback fetch;
//! - later observers join the existing channel;
//! - the last observer to leave tears everything down.
//!
//! ## Usage
//!
//! ```ignore
//! let (handle, mut events) = tracker.track("ride_123").await;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         RideEvent::StatusChanged { status, .. } => render(status),
//!         RideEvent::MatchTimeout { .. } => show_no_driver_found(),
//!         _ => {}
//!     }
//! }
//! tracker.untrack(handle.ride_id(), handle.observer_id()).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::PushFrame;
use core_runtime::TrackingSettings;
use tracing::{debug, info, instrument, warn};

use crate::api::RideApi;
use crate::connection::{ConnectionManager, ConnectionSnapshot, SessionId, SessionStart};
use crate::fallback::FallbackPoller;
use crate::observer::{Observer, ObserverHandle, ObserverId, RideEventStream};
use crate::types::{RideId, RideSnapshot};

const MATCH_TIMEOUT_REASON: &str = "No driver assigned in time";

#[derive(Clone)]
pub struct RideTracker {
    connections: ConnectionManager,
    poller: FallbackPoller,
    api: Arc<dyn RideApi>,
    settings: TrackingSettings,
}

impl RideTracker {
    pub fn new(
        connections: ConnectionManager,
        api: Arc<dyn RideApi>,
        settings: TrackingSettings,
    ) -> Self {
        let poller = FallbackPoller::new(Arc::clone(&api), connections.clone());
        Self {
            connections,
            poller,
            api,
            settings,
        }
    }

    /// Start observing `ride_id` with a fresh observer.
    pub async fn track(&self, ride_id: impl Into<RideId>) -> (ObserverHandle, RideEventStream) {
        let (observer, stream) = Observer::channel();
        let handle = self.track_with(ride_id, observer).await;
        (handle, stream)
    }

    /// Start observing `ride_id` with a caller-built observer. Registering
    /// the same observer twice is a no-op.
    pub async fn track_with(&self, ride_id: impl Into<RideId>, observer: Observer) -> ObserverHandle {
        let ride_id = ride_id.into();
        let attachment = self.connections.attach(ride_id.clone(), observer).await;
        if let Some(started) = attachment.started {
            self.start_guards(&ride_id, started).await;
        }
        attachment.handle
    }

    /// Stop delivering events to `observer_id`. The last observer out closes
    /// the channel and cancels the ride's timers.
    pub async fn untrack(&self, ride_id: &RideId, observer_id: ObserverId) {
        self.connections.disconnect(ride_id, Some(observer_id)).await;
    }

    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        self.connections.timeout_guard().disarm_all();
    }

    pub async fn send(&self, ride_id: &RideId, frame: PushFrame) -> bool {
        self.connections.send(ride_id, frame).await
    }

    pub async fn is_connected(&self, ride_id: &RideId) -> bool {
        self.connections.is_connected(ride_id).await
    }

    /// Latest known ride state, if the ride is tracked and any state arrived.
    pub async fn snapshot(&self, ride_id: &RideId) -> Option<RideSnapshot> {
        self.connections.ride_snapshot(ride_id).await
    }

    pub async fn connection(&self, ride_id: &RideId) -> Option<ConnectionSnapshot> {
        self.connections.connection_snapshot(ride_id).await
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn api(&self) -> &Arc<dyn RideApi> {
        &self.api
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    #[instrument(skip(self, started), fields(ride_id = %ride_id, restarted = started.restarted))]
    async fn start_guards(&self, ride_id: &RideId, started: SessionStart) {
        let guard = self.connections.timeout_guard();

        let awaiting = self.connections.awaiting_driver(ride_id).await;
        if awaiting && !self.arm_match_timeout(ride_id, started.session) {
            if started.restarted {
                debug!("Match timeout from before the restart is still armed");
            } else if self.connections.is_current(ride_id, started.session).await {
                // Left behind by an earlier session of this ride.
                warn!("Replacing stale match timeout");
                guard.disarm(ride_id);
                if !self.arm_match_timeout(ride_id, started.session) {
                    warn!("Match timeout not armed; another session took the guard");
                }
            } else {
                debug!("Session ended before the match timeout armed");
            }
        }

        // The channel may have delivered an assignment, or the session may
        // have ended, before the guard was armed.
        if !self.connections.awaiting_driver(ride_id).await && guard.disarm(ride_id) {
            debug!("Ride stopped waiting for a driver before the guard armed");
        }

        self.poller.schedule(
            ride_id.clone(),
            self.settings.fallback_grace_period,
            started.cancel.child_token(),
        );
    }

    fn arm_match_timeout(&self, ride_id: &RideId, session: SessionId) -> bool {
        let waited = self.settings.driver_match_timeout;
        let tracker = self.clone();
        let timed_out = ride_id.clone();
        self.connections
            .timeout_guard()
            .arm(ride_id, waited, move || async move {
                tracker.on_match_timeout(timed_out, session, waited).await;
            })
    }

    async fn on_match_timeout(&self, ride_id: RideId, session: SessionId, waited: Duration) {
        if !self.connections.expire_match(&ride_id, session, waited).await {
            return;
        }
        if !self.settings.cancel_on_match_timeout {
            return;
        }

        match self.api.cancel_ride(&ride_id, Some(MATCH_TIMEOUT_REASON)).await {
            Ok(ride) => info!(ride_id = %ride_id, status = %ride.status, "Cancelled unmatched ride"),
            Err(e) if e.is_already_terminal() => {
                debug!(ride_id = %ride_id, "Unmatched ride already ended")
            }
            Err(e) => warn!(ride_id = %ride_id, error = %e, "Failed to cancel unmatched ride"),
        }
    }
}

impl std::fmt::Debug for RideTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RideTracker")
            .field("connections", &self.connections)
            .field("settings", &self.settings)
            .finish()
    }
}
