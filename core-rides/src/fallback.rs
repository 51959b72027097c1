//! # Fallback Poller
//!
//! One-shot reconciliation fetch for a ride whose push channel has not
//! connected within the grace window. This is not a polling loop: push stays
//! the source of truth, and a failed fetch is logged and dropped.
//!
//! The fetched snapshot goes through the ride's state machine like a push
//! event, but only if nothing changed while the request was in flight. A
//! result that lands after a push update, after teardown, or after the ride
//! reached a terminal state is discarded.

use std::sync::Arc;
use std::time::Duration;

use core_runtime::events::{CoreEvent, TrackingEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::RideApi;
use crate::connection::ConnectionManager;
use crate::types::{RideId, RideSnapshot};

#[derive(Clone)]
pub struct FallbackPoller {
    api: Arc<dyn RideApi>,
    connections: ConnectionManager,
}

impl FallbackPoller {
    pub fn new(api: Arc<dyn RideApi>, connections: ConnectionManager) -> Self {
        Self { api, connections }
    }

    /// Fetch the ride once and reconcile it into the tracked state.
    ///
    /// Returns the fetched snapshot, or `None` when the ride is not tracked
    /// or the fetch failed. A returned snapshot may still have been discarded
    /// as stale.
    #[instrument(skip(self), fields(ride_id = %ride_id))]
    pub async fn poll_once(&self, ride_id: &RideId) -> Option<RideSnapshot> {
        let checkpoint = self.connections.checkpoint(ride_id).await?;

        let ride = match self.api.fetch_ride(ride_id).await {
            Ok(ride) => ride,
            Err(e) => {
                warn!(error = %e, "Fallback fetch failed");
                self.emit(TrackingEvent::FallbackFailed {
                    ride_id: ride_id.to_string(),
                    message: e.to_string(),
                });
                return None;
            }
        };

        let applied = self
            .connections
            .reconcile(ride_id, checkpoint, ride.clone())
            .await;
        info!(status = %ride.status, applied, "Fallback fetch resolved");
        self.emit(TrackingEvent::FallbackPolled {
            ride_id: ride_id.to_string(),
            status: ride.status.to_string(),
            applied,
        });

        Some(ride)
    }

    /// Poll once after `grace` unless the channel connected first or `cancel`
    /// fired.
    pub fn schedule(&self, ride_id: RideId, grace: Duration, cancel: CancellationToken) {
        let poller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }

            if poller.connections.is_connected(&ride_id).await {
                debug!(ride_id = %ride_id, "Channel connected within grace window; skipping fallback fetch");
                return;
            }
            poller.poll_once(&ride_id).await;
        });
    }

    fn emit(&self, event: TrackingEvent) {
        self.connections
            .event_bus()
            .emit(CoreEvent::Tracking(event))
            .ok();
    }
}

impl std::fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPoller").finish_non_exhaustive()
    }
}
