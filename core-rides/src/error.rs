//! Error types for ride tracking and the ride REST client

use std::fmt;

use thiserror::Error;

use crate::types::{RideId, RideStatus};

// ============================================================================
// Tracking errors (observer-facing)
// ============================================================================

/// Category of a [`TrackingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingErrorKind {
    /// The channel could not be opened or dropped mid-handshake.
    Transport,
    /// The server rejected the handshake credentials.
    Authentication,
    /// An inbound event could not be understood.
    Protocol,
    /// Reconnect attempts hit the configured bound. Terminal for the session.
    ReconnectExhausted,
    /// The server sent an `error` event.
    Server,
}

impl TrackingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingErrorKind::Transport => "transport",
            TrackingErrorKind::Authentication => "authentication",
            TrackingErrorKind::Protocol => "protocol",
            TrackingErrorKind::ReconnectExhausted => "reconnect_exhausted",
            TrackingErrorKind::Server => "server",
        }
    }
}

impl fmt::Display for TrackingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error delivered to every observer of a ride through `RideEvent::Error`.
///
/// Never returned from `connect`/`disconnect`; it travels on the observer
/// channels, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TrackingError {
    pub kind: TrackingErrorKind,
    pub message: String,
}

impl TrackingError {
    pub fn new(kind: TrackingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TrackingErrorKind::Transport, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(TrackingErrorKind::Authentication, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TrackingErrorKind::Protocol, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(TrackingErrorKind::Server, message)
    }

    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::new(
            TrackingErrorKind::ReconnectExhausted,
            format!(
                "gave up after {} reconnect attempts; track the ride again to retry",
                attempts
            ),
        )
    }

    /// Classify a handshake rejection message.
    ///
    /// Servers reject bad credentials with messages such as `"Authentication
    /// error"`, `"jwt expired"` or `"Unauthorized"`.
    pub fn from_rejection(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        let is_auth = ["auth", "token", "jwt", "forbidden"]
            .iter()
            .any(|needle| lowered.contains(needle));
        if is_auth {
            Self::authentication(message)
        } else {
            Self::transport(message)
        }
    }

    /// Whether tracking has stopped retrying for this ride.
    ///
    /// Only `ReconnectExhausted` is terminal. An authentication rejection
    /// takes the generic reconnect path, so a token refreshed in the meantime
    /// is used on the next attempt; a server that keeps rejecting ends the
    /// session with `ReconnectExhausted`.
    pub fn is_terminal(&self) -> bool {
        self.kind == TrackingErrorKind::ReconnectExhausted
    }
}

// ============================================================================
// REST errors
// ============================================================================

#[derive(Error, Debug)]
pub enum RideApiError {
    #[error("Ride {ride_id} not found")]
    NotFound { ride_id: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// The ride already reached `COMPLETED` or `CANCELLED`.
    #[error("Ride {ride_id} is already terminal")]
    AlreadyTerminal {
        ride_id: String,
        status: Option<RideStatus>,
    },

    #[error("Ride API error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Invalid ride API response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl RideApiError {
    pub(crate) fn not_found(ride_id: &RideId) -> Self {
        RideApiError::NotFound {
            ride_id: ride_id.to_string(),
        }
    }

    /// Whether the error means the desired end state was already reached.
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, RideApiError::AlreadyTerminal { .. })
    }
}

pub type Result<T> = std::result::Result<T, RideApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert_eq!(
            TrackingError::from_rejection("Authentication error").kind,
            TrackingErrorKind::Authentication
        );
        assert_eq!(
            TrackingError::from_rejection("jwt expired").kind,
            TrackingErrorKind::Authentication
        );
        assert_eq!(
            TrackingError::from_rejection("handshake timed out").kind,
            TrackingErrorKind::Transport
        );
    }

    #[test]
    fn test_error_display() {
        let error = TrackingError::server("ride not found");
        assert_eq!(error.to_string(), "server error: ride not found");

        let error = RideApiError::Http {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Ride API error (status 500): boom");
    }

    #[test]
    fn test_exhaustion_is_terminal() {
        assert!(TrackingError::reconnect_exhausted(5).is_terminal());
        assert!(!TrackingError::transport("reset").is_terminal());
        assert!(!TrackingError::authentication("jwt expired").is_terminal());
    }
}
