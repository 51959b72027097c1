//! # Ride Tracking Core
//!
//! Real-time lifecycle tracking for a single active ride, shared by every
//! screen that observes it.
//!
//! ## Overview
//!
//! A ride moves `PENDING -> DRIVER_ASSIGNED -> ARRIVED -> IN_PROGRESS` and ends
//! `COMPLETED` or `CANCELLED`. Screens mount and unmount independently while it
//! does; each registers an observer and receives the same ordered event stream
//! over one shared push channel.
//!
//! ## Components
//!
//! - [`ConnectionManager`]: one push channel per ride, authenticated,
//!   reconnected with bounded exponential backoff
//! - [`ObserverSet`](registry::ObserverSet): per-ride observer registry with
//!   reference-counted teardown
//! - [`RideStateMachine`]: validates and deduplicates updates, ignores
//!   everything after a terminal status
//! - [`TimeoutGuard`]: bounded wait for driver assignment
//! - [`FallbackPoller`]: one-shot REST reconciliation when push is slow to
//!   connect
//! - [`RideTracker`]: composes the above
//! - [`HttpRideApi`]: REST fetch and mutations
//!
//! ## Errors
//!
//! `connect` and `disconnect` never fail. Connectivity, authentication and
//! protocol problems are delivered to observers as [`RideEvent::Error`];
//! REST calls return [`RideApiError`].

pub mod api;
pub mod backoff;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod timeout;
pub mod tracker;
pub mod types;

pub use api::{HttpRideApi, RideApi};
pub use backoff::{ReconnectDecision, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionManagerBuilder, ConnectionSnapshot, PushEndpoint};
pub use error::{Result, RideApiError, TrackingError, TrackingErrorKind};
pub use fallback::FallbackPoller;
pub use observer::{Observer, ObserverHandle, ObserverId, RideEvent, RideEventStream};
pub use registry::ObserverSet;
pub use state::{RideStateMachine, RideUpdate};
pub use timeout::TimeoutGuard;
pub use tracker::RideTracker;
pub use types::{
    Coordinates, CreateRideRequest, DriverSnapshot, Eta, RideId, RideSnapshot, RideStatus,
    UnknownStatus, Vehicle,
};
