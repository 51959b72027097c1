//! # Ride State Machine
//!
//! Tracks server-declared ride state. Transitions are permissive: the server
//! is authoritative, so out-of-order statuses are applied (and logged). The
//! only suppression is after a terminal status, when every further update for
//! the ride is discarded.
//!
//! A machine sealed after the match window expired stops tracking progress
//! but still accepts the ride's terminal status, so a server-side
//! cancellation or completion is never lost.
//!
//! The decision itself is the pure [`transition`] function; [`RideStateMachine`]
//! applies it and keeps the snapshots.

use tracing::debug;

use crate::observer::RideEvent;
use crate::types::{DriverSnapshot, Eta, RideSnapshot, RideStatus};

/// A state-affecting inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum RideUpdate {
    /// `ride:update`, or a fallback fetch result.
    Snapshot(RideSnapshot),
    /// `ride:status`, optionally carrying the ride.
    Status {
        status: RideStatus,
        ride: Option<RideSnapshot>,
    },
    /// `driver:update`
    Driver(DriverSnapshot),
    /// `eta:update`
    Eta(Eta),
}

impl RideUpdate {
    /// Status the update declares, if any.
    pub fn declared_status(&self) -> Option<RideStatus> {
        match self {
            RideUpdate::Snapshot(ride) => Some(ride.status),
            RideUpdate::Status { status, .. } => Some(*status),
            RideUpdate::Driver(_) | RideUpdate::Eta(_) => None,
        }
    }
}

/// Outcome of [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: RideStatus,
    pub propagate: bool,
}

/// `(current status, incoming update) -> (next status, should propagate)`.
///
/// ```
/// use core_rides::state::{transition, RideUpdate};
/// use core_rides::{Eta, RideStatus};
///
/// let t = transition(
///     RideStatus::Completed,
///     &RideUpdate::Status { status: RideStatus::Cancelled, ride: None },
/// );
/// assert_eq!(t.next, RideStatus::Completed);
/// assert!(!t.propagate);
///
/// let t = transition(RideStatus::Pending, &RideUpdate::Eta(Eta::from_minutes(3.0)));
/// assert_eq!(t.next, RideStatus::Pending);
/// assert!(t.propagate);
/// ```
pub fn transition(current: RideStatus, update: &RideUpdate) -> Transition {
    if current.is_terminal() {
        return Transition {
            next: current,
            propagate: false,
        };
    }

    Transition {
        next: update.declared_status().unwrap_or(current),
        propagate: true,
    }
}

/// Per-ride state.
#[derive(Debug, Clone)]
pub struct RideStateMachine {
    status: RideStatus,
    ride: Option<RideSnapshot>,
    driver: Option<DriverSnapshot>,
    eta: Option<Eta>,
    sealed: bool,
    revision: u64,
}

impl Default for RideStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RideStateMachine {
    /// A ride that was just requested: `PENDING`, nothing known yet.
    pub fn new() -> Self {
        Self {
            status: RideStatus::Pending,
            ride: None,
            driver: None,
            eta: None,
            sealed: false,
            revision: 0,
        }
    }

    pub fn status(&self) -> RideStatus {
        self.status
    }

    pub fn ride(&self) -> Option<&RideSnapshot> {
        self.ride.as_ref()
    }

    pub fn driver(&self) -> Option<&DriverSnapshot> {
        self.driver.as_ref()
    }

    pub fn eta(&self) -> Option<Eta> {
        self.eta
    }

    /// Number of updates applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Stop accepting updates other than a terminal status, e.g. after the
    /// match window expired.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether the ride expects no further progress: it ended, or its match
    /// window expired.
    pub fn is_closed(&self) -> bool {
        self.sealed || self.status.is_terminal()
    }

    /// Apply an update.
    ///
    /// Returns the typed events to fan out, in delivery order, or `None` when
    /// the update was discarded. An accepted update may produce no typed event
    /// (a repeated status without a ride payload).
    pub fn apply(&mut self, update: RideUpdate) -> Option<Vec<RideEvent>> {
        let ends_ride = update
            .declared_status()
            .is_some_and(|status| status.is_terminal());
        if self.sealed && !ends_ride {
            debug!("Discarding ride update for sealed session");
            return None;
        }

        let Transition { next, propagate } = transition(self.status, &update);
        if !propagate {
            debug!(status = %self.status, "Discarding ride update after terminal status");
            return None;
        }

        let previous = self.status;
        let mut events = Vec::with_capacity(2);

        match update {
            RideUpdate::Snapshot(ride) => {
                self.ride = Some(ride.clone());
                events.push(RideEvent::RideUpdated(ride));
            }
            RideUpdate::Status { status, ride } => match ride {
                Some(mut ride) => {
                    ride.status = status;
                    self.ride = Some(ride.clone());
                    events.push(RideEvent::RideUpdated(ride));
                }
                None => {
                    if let Some(stored) = self.ride.as_mut() {
                        stored.status = status;
                    }
                }
            },
            RideUpdate::Driver(driver) => {
                self.driver = Some(driver.clone());
                events.push(RideEvent::DriverUpdated(driver));
            }
            RideUpdate::Eta(eta) => {
                self.eta = Some(eta);
                events.push(RideEvent::EtaUpdated(eta));
            }
        }

        if next != previous {
            if !previous.can_transition_to(next) {
                debug!(from = %previous, to = %next, "Applying out-of-order status");
            }
            self.status = next;
            events.push(RideEvent::StatusChanged {
                previous,
                status: next,
            });
        }

        if next.is_terminal() {
            self.driver = None;
            self.eta = None;
        }

        self.revision += 1;
        Some(events)
    }
}
