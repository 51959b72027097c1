//! # Event Bus System
//!
//! Diagnostics bus for the ride tracking core, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Ride observers receive their events on dedicated per-observer channels; this
//! bus is the side channel for hosts that want a single feed of what the core is
//! doing across every tracked ride (connection health, reconnect scheduling,
//! timeouts, fallback polls, credential problems).
//!
//! ```text
//! ┌───────────────────┐   emit   ┌───────────┐   subscribe   ┌──────────────┐
//! │ ConnectionManager ├─────────>│           ├──────────────>│ Host metrics │
//! └───────────────────┘          │ EventBus  │               └──────────────┘
//! ┌───────────────────┐   emit   │ (broadcast│   subscribe   ┌──────────────┐
//! │ RideTracker       ├─────────>│  channel) ├──────────────>│ Debug panel  │
//! └───────────────────┘          └───────────┘               └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, TrackingEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Tracking(TrackingEvent::Connected {
//!         ride_id: "ride_123".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Push channel connected");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n` events.
//!   Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: all senders dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential resolution events
    Auth(AuthEvent),
    /// Ride tracking lifecycle and connection health
    Tracking(TrackingEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Tracking(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Tracking(TrackingEvent::ReconnectExhausted { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::CredentialUnavailable { .. })
            | CoreEvent::Tracking(TrackingEvent::Disconnected { .. })
            | CoreEvent::Tracking(TrackingEvent::MatchTimeout { .. })
            | CoreEvent::Tracking(TrackingEvent::FallbackFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Tracking(TrackingEvent::Connected { .. })
            | CoreEvent::Tracking(TrackingEvent::StatusChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Ride the event concerns, if any.
    pub fn ride_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Auth(_) => None,
            CoreEvent::Tracking(e) => Some(e.ride_id()),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// No bearer token could be resolved; the connection proceeds anonymously.
    CredentialUnavailable {
        /// Secure store key that was read.
        key: String,
        /// Why resolution failed (missing, unreadable, not UTF-8).
        reason: String,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::CredentialUnavailable { .. } => "Session credential unavailable",
        }
    }
}

// ============================================================================
// Tracking Events
// ============================================================================

/// Events describing one ride's tracking session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TrackingEvent {
    /// First observer registered for a ride.
    SessionStarted { ride_id: String },
    /// Last observer left (or forced teardown); all resources released.
    SessionEnded { ride_id: String },
    /// Push channel joined the ride namespace.
    Connected { ride_id: String },
    /// Push channel dropped without a local close.
    Disconnected { ride_id: String, reason: String },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        ride_id: String,
        /// 1-based attempt number
        attempt: u32,
        delay_ms: u64,
    },
    /// Reconnect attempts hit the configured bound; the channel is abandoned.
    ReconnectExhausted { ride_id: String, attempts: u32 },
    /// Ride status moved to a new value.
    StatusChanged { ride_id: String, status: String },
    /// No driver was assigned within the match window.
    MatchTimeout { ride_id: String, timeout_ms: u64 },
    /// The one-shot reconciliation fetch resolved.
    FallbackPolled {
        ride_id: String,
        status: String,
        /// Whether the result was fed into the state machine
        applied: bool,
    },
    /// The one-shot reconciliation fetch failed (never surfaced to observers).
    FallbackFailed { ride_id: String, message: String },
}

impl TrackingEvent {
    fn description(&self) -> &str {
        match self {
            TrackingEvent::SessionStarted { .. } => "Ride tracking started",
            TrackingEvent::SessionEnded { .. } => "Ride tracking ended",
            TrackingEvent::Connected { .. } => "Push channel connected",
            TrackingEvent::Disconnected { .. } => "Push channel disconnected",
            TrackingEvent::ReconnectScheduled { .. } => "Reconnect scheduled",
            TrackingEvent::ReconnectExhausted { .. } => "Reconnect attempts exhausted",
            TrackingEvent::StatusChanged { .. } => "Ride status changed",
            TrackingEvent::MatchTimeout { .. } => "Driver match timed out",
            TrackingEvent::FallbackPolled { .. } => "Fallback poll completed",
            TrackingEvent::FallbackFailed { .. } => "Fallback poll failed",
        }
    }

    pub fn ride_id(&self) -> &str {
        match self {
            TrackingEvent::SessionStarted { ride_id }
            | TrackingEvent::SessionEnded { ride_id }
            | TrackingEvent::Connected { ride_id }
            | TrackingEvent::Disconnected { ride_id, .. }
            | TrackingEvent::ReconnectScheduled { ride_id, .. }
            | TrackingEvent::ReconnectExhausted { ride_id, .. }
            | TrackingEvent::StatusChanged { ride_id, .. }
            | TrackingEvent::MatchTimeout { ride_id, .. }
            | TrackingEvent::FallbackPolled { ride_id, .. }
            | TrackingEvent::FallbackFailed { ride_id, .. } => ride_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let ride_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.ride_id() == Some("ride_123"));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(ride_id: &str) -> CoreEvent {
        CoreEvent::Tracking(TrackingEvent::Connected {
            ride_id: ride_id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(connected("ride_123")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Tracking(TrackingEvent::ReconnectScheduled {
            ride_id: "ride_123".to_string(),
            attempt: 1,
            delay_ms: 1000,
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filters_by_ride() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|event| event.ride_id() == Some("ride_999"));

        bus.emit(connected("ride_123")).ok();
        bus.emit(CoreEvent::Auth(AuthEvent::CredentialUnavailable {
            key: "auth_token".to_string(),
            reason: "missing".to_string(),
        }))
        .ok();
        bus.emit(connected("ride_999")).ok();

        assert_eq!(stream.recv().await.unwrap(), connected("ride_999"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for attempt in 1..=5 {
            bus.emit(CoreEvent::Tracking(TrackingEvent::ReconnectScheduled {
                ride_id: "ride_123".to_string(),
                attempt,
                delay_ms: 1000,
            }))
            .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let exhausted = CoreEvent::Tracking(TrackingEvent::ReconnectExhausted {
            ride_id: "ride_123".to_string(),
            attempts: 5,
        });
        assert_eq!(exhausted.severity(), EventSeverity::Error);

        let timeout = CoreEvent::Tracking(TrackingEvent::MatchTimeout {
            ride_id: "ride_123".to_string(),
            timeout_ms: 300_000,
        });
        assert_eq!(timeout.severity(), EventSeverity::Warning);

        assert_eq!(connected("ride_123").severity(), EventSeverity::Info);

        let started = CoreEvent::Tracking(TrackingEvent::SessionStarted {
            ride_id: "ride_123".to_string(),
        });
        assert_eq!(started.severity(), EventSeverity::Debug);
        assert_eq!(started.description(), "Ride tracking started");
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Tracking(TrackingEvent::FallbackPolled {
            ride_id: "ride_999".to_string(),
            status: "PENDING".to_string(),
            applied: true,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Tracking");
        assert_eq!(json["payload"]["event"], "FallbackPolled");
        assert_eq!(json["payload"]["ride_id"], "ride_999");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv_with_event() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(connected("ride_123")).ok();

        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received, connected("ride_123"));
    }
}
