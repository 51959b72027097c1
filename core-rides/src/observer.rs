//! Observer channels
//!
//! Each observer owns one unbounded channel of [`RideEvent`]s. The core keeps
//! the sending half; the consumer keeps the [`RideEventStream`]. Membership is
//! keyed by [`ObserverId`], so registering a clone of the same [`Observer`]
//! twice is idempotent.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bridge_traits::PushFrame;
use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TrackingError;
use crate::types::{DriverSnapshot, Eta, RideId, RideSnapshot, RideStatus};

/// Everything an observer of one ride can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum RideEvent {
    /// The push channel joined the ride namespace.
    Connected,
    /// The push channel dropped without a local close. A reconnect follows
    /// unless attempts are exhausted.
    Disconnected { reason: String },
    /// Connectivity, protocol or server error.
    Error(TrackingError),
    /// Full ride snapshot replaced.
    RideUpdated(RideSnapshot),
    /// Ride status moved to a new value.
    StatusChanged {
        previous: RideStatus,
        status: RideStatus,
    },
    /// Driver snapshot replaced.
    DriverUpdated(DriverSnapshot),
    EtaUpdated(Eta),
    /// Raw inbound frame, delivered after the typed events it produced.
    Message(PushFrame),
    /// No driver was assigned within the match window. Sent at most once per
    /// session; later ride events for the session are discarded.
    MatchTimeout { waited: Duration },
}

impl RideEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::Connected => "connected",
            RideEvent::Disconnected { .. } => "disconnected",
            RideEvent::Error(_) => "error",
            RideEvent::RideUpdated(_) => "ride_updated",
            RideEvent::StatusChanged { .. } => "status_changed",
            RideEvent::DriverUpdated(_) => "driver_updated",
            RideEvent::EtaUpdated(_) => "eta_updated",
            RideEvent::Message(_) => "message",
            RideEvent::MatchTimeout { .. } => "match_timeout",
        }
    }
}

/// Observer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of one observer's channel.
#[derive(Debug, Clone)]
pub struct Observer {
    id: ObserverId,
    sender: mpsc::UnboundedSender<RideEvent>,
}

impl Observer {
    /// Create an observer and the stream its events arrive on.
    pub fn channel() -> (Self, RideEventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ObserverId::new(),
                sender,
            },
            RideEventStream { receiver },
        )
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Deliver an event. Returns `false` once the stream has been dropped.
    pub(crate) fn deliver(&self, event: RideEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of one observer's channel.
///
/// Ends (`None`) once the ride's tracking session is torn down.
#[derive(Debug)]
pub struct RideEventStream {
    receiver: mpsc::UnboundedReceiver<RideEvent>,
}

impl RideEventStream {
    pub async fn recv(&mut self) -> Option<RideEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<RideEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every already-delivered event.
    pub fn drain(&mut self) -> Vec<RideEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for RideEventStream {
    type Item = RideEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Registration returned by `connect`; pass it back to stop observing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    ride_id: RideId,
    observer_id: ObserverId,
}

impl ObserverHandle {
    pub(crate) fn new(ride_id: RideId, observer_id: ObserverId) -> Self {
        Self {
            ride_id,
            observer_id,
        }
    }

    pub fn ride_id(&self) -> &RideId {
        &self.ride_id
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }
}
