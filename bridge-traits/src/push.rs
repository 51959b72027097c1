//! Push Channel Abstraction
//!
//! A push transport opens one namespaced, server-initiated event channel. The
//! core never sees sockets: it receives a [`PushChannel`], a pair of in-process
//! queues, and drives the protocol through them.
//!
//! ```text
//!            outbound: PushCommand             ┌──────────────┐
//!  core ─────────────────────────────────────> │              │
//!                                              │  transport   │ <── network ──> server
//!  core <───────────────────────────────────── │   task       │
//!            inbound: PushSignal               └──────────────┘
//! ```
//!
//! Signal ordering contract for implementations:
//! - `Open` is sent once the namespace handshake is accepted.
//! - `Frame` carries each named event in arrival order.
//! - Exactly one of `Closed` or `ConnectError` ends the stream; nothing is sent
//!   after it. Dropping the inbound sender is treated as `Closed`.
//! - `PushCommand::Emit` issued before `Open` is delivered once the namespace
//!   is joined, in order.
//! - `PushCommand::Close`, or dropping the outbound sender, makes the transport
//!   close the connection without emitting further signals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// One named event on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    pub event: String,
    pub payload: Value,
}

impl PushFrame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Instruction from the core to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PushCommand {
    /// Emit a named event to the server.
    Emit(PushFrame),
    /// Close the channel. No `Closed` signal follows a local close.
    Close,
}

/// Notification from the transport to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSignal {
    /// Namespace handshake accepted; the channel is live.
    Open,
    /// A named event arrived.
    Frame(PushFrame),
    /// The connection dropped or the server disconnected the namespace.
    Closed { reason: String },
    /// The handshake was rejected or the connection could not be established.
    ConnectError { message: String },
}

/// Parameters for opening a channel.
#[derive(Clone, PartialEq, Eq)]
pub struct PushChannelRequest {
    /// Server base URL (e.g. `https://api.example.com`)
    pub url: String,
    /// Namespace to join (e.g. `/ride-updates`)
    pub namespace: String,
    /// Bearer token sent with the handshake; `None` connects anonymously
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for PushChannelRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushChannelRequest")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Endpoints of an opened channel.
#[derive(Debug)]
pub struct PushChannel {
    pub outbound: mpsc::UnboundedSender<PushCommand>,
    pub inbound: mpsc::UnboundedReceiver<PushSignal>,
}

impl PushChannel {
    /// Create a channel plus the transport-side endpoints.
    ///
    /// Transports (and test doubles) keep the returned [`PushChannelPeer`] and
    /// hand the [`PushChannel`] to the core.
    pub fn pair() -> (Self, PushChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            PushChannelPeer {
                commands: outbound_rx,
                signals: inbound_tx,
            },
        )
    }
}

/// Transport-side endpoints of a [`PushChannel`].
#[derive(Debug)]
pub struct PushChannelPeer {
    pub commands: mpsc::UnboundedReceiver<PushCommand>,
    pub signals: mpsc::UnboundedSender<PushSignal>,
}

/// Push transport trait
///
/// Implementations dial the server and return once the channel exists. The
/// namespace handshake may complete later and is reported through
/// [`PushSignal::Open`] or [`PushSignal::ConnectError`].
///
/// # Errors
///
/// Returns an error only when the channel could not be created at all (bad
/// URL, DNS failure, refused connection). The core treats that the same way
/// as a `ConnectError` signal.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, request: PushChannelRequest) -> Result<PushChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_pair_routes_both_directions() {
        let (mut channel, mut peer) = PushChannel::pair();

        channel
            .outbound
            .send(PushCommand::Emit(PushFrame::new(
                "ride:subscribe",
                json!({ "rideId": "ride_123" }),
            )))
            .unwrap();
        peer.signals.send(PushSignal::Open).unwrap();

        match peer.commands.recv().await {
            Some(PushCommand::Emit(frame)) => assert_eq!(frame.event, "ride:subscribe"),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(channel.inbound.recv().await, Some(PushSignal::Open));
    }

    #[test]
    fn test_request_debug_redacts_token() {
        let request = PushChannelRequest {
            url: "https://api.example.com".to_string(),
            namespace: "/ride-updates".to_string(),
            auth_token: Some("super-secret".to_string()),
        };

        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
