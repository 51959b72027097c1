//! Socket.IO v5 over Engine.IO v4 packet codec
//!
//! Only the text subset used by namespaced event channels is supported:
//!
//! ```text
//! 0{"sid":..,"pingInterval":..,"pingTimeout":..}   engine open
//! 2 / 3                                             engine ping / pong
//! 40/ride-updates,{"token":".."}                    namespace connect (and ack)
//! 41/ride-updates,                                  namespace disconnect
//! 42/ride-updates,["ride:update",{..}]              event
//! 44/ride-updates,{"message":".."}                  connect error
//! ```
//!
//! Binary attachments and acknowledgements are out of scope; ack ids on
//! inbound events are parsed and dropped.

use bridge_traits::push::PushFrame;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type: {0}")]
    UnknownType(char),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// Handshake sent by the server in the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHandshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl EngineHandshake {
    /// Longest silence tolerated before the connection is considered dead.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(EngineHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        frame: PushFrame,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
    /// Acks and binary packets
    Unsupported {
        namespace: String,
        kind: char,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. }
            | SocketPacket::Unsupported { namespace, .. } => namespace,
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

pub fn decode(text: &str) -> Result<EnginePacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|e| CodecError::Malformed(format!("open handshake: {}", e))),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket_packet(rest).map(EnginePacket::Message),
        '6' => Ok(EnginePacket::Noop),
        other => Err(CodecError::UnknownType(other)),
    }
}

fn decode_socket_packet(text: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(CodecError::Empty)?;
    let (namespace, body) = split_namespace(chars.as_str());
    let body = skip_ack_id(body);

    match kind {
        '0' => {
            let data = if body.is_empty() {
                None
            } else {
                Some(parse_json(body)?)
            };
            Ok(SocketPacket::Connect { namespace, data })
        }
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let frame = decode_event(parse_json(body)?)?;
            Ok(SocketPacket::Event { namespace, frame })
        }
        '4' => {
            let message = if body.is_empty() {
                "connection refused".to_string()
            } else {
                match parse_json(body)? {
                    Value::String(message) => message,
                    value => value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string()),
                }
            };
            Ok(SocketPacket::ConnectError { namespace, message })
        }
        '3' | '5' | '6' => Ok(SocketPacket::Unsupported { namespace, kind }),
        other => Err(CodecError::UnknownType(other)),
    }
}

fn split_namespace(text: &str) -> (String, &str) {
    if !text.starts_with('/') {
        return ("/".to_string(), text);
    }
    match text.find(',') {
        Some(idx) => (text[..idx].to_string(), &text[idx + 1..]),
        None => (text.to_string(), ""),
    }
}

fn skip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json(text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// `["name", payload, ...]`. Extra arguments are folded into an array.
fn decode_event(value: Value) -> Result<PushFrame, CodecError> {
    let Value::Array(mut items) = value else {
        return Err(CodecError::Malformed("event body is not an array".into()));
    };
    if items.is_empty() {
        return Err(CodecError::Malformed("event without name".into()));
    }
    let event = match items.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(CodecError::Malformed(format!(
                "event name is not a string: {}",
                other
            )))
        }
    };
    let payload = match items.len() {
        0 => Value::Null,
        1 => items.remove(0),
        _ => Value::Array(items),
    };
    Ok(PushFrame { event, payload })
}

// ============================================================================
// Encoding
// ============================================================================

pub fn encode_pong() -> String {
    "3".to_string()
}

pub fn encode_connect(namespace: &str, auth_token: Option<&str>) -> String {
    let auth = auth_token.map(|token| json!({ "token": token }).to_string());
    match (namespace_prefix(namespace), auth) {
        (prefix, Some(auth)) => format!("40{}{}", prefix, auth),
        (prefix, None) => format!("40{}", prefix),
    }
}

pub fn encode_disconnect(namespace: &str) -> String {
    format!("41{}", namespace_prefix(namespace))
}

pub fn encode_event(namespace: &str, frame: &PushFrame) -> String {
    let body = Value::Array(vec![
        Value::String(frame.event.clone()),
        frame.payload.clone(),
    ]);
    format!("42{}{}", namespace_prefix(namespace), body)
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace.is_empty() || namespace == "/" {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// Build the websocket endpoint for an HTTP(S) or WS(S) base URL.
pub fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/socket.io/?EIO=4&transport=websocket", base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open_handshake() {
        let packet = decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#)
            .unwrap();

        match packet {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.liveness_window(), Duration::from_millis(30_000));
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_decode_namespaced_event() {
        let packet =
            decode(r#"42/ride-updates,["ride:update",{"rideId":"ride_123","status":"ACCEPTED"}]"#)
                .unwrap();

        let EnginePacket::Message(SocketPacket::Event { namespace, frame }) = packet else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/ride-updates");
        assert_eq!(frame.event, "ride:update");
        assert_eq!(frame.payload["status"], "ACCEPTED");
    }

    #[test]
    fn test_decode_event_with_ack_id_and_default_namespace() {
        let packet = decode(r#"4212["eta:update",7]"#).unwrap();

        let EnginePacket::Message(SocketPacket::Event { namespace, frame }) = packet else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/");
        assert_eq!(frame.payload, json!(7));
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert_eq!(
            decode(r#"40/ride-updates,{"sid":"xyz"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/ride-updates".into(),
                data: Some(json!({ "sid": "xyz" })),
            })
        );
        assert_eq!(
            decode(r#"44/ride-updates,{"message":"invalid token"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/ride-updates".into(),
                message: "invalid token".into(),
            })
        );
        assert_eq!(
            decode("41/ride-updates,").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect {
                namespace: "/ride-updates".into(),
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(""), Err(CodecError::Empty));
        assert_eq!(decode("9"), Err(CodecError::UnknownType('9')));
        assert!(matches!(
            decode("42/ride-updates,{not json"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"42[]"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_packets() {
        assert_eq!(
            encode_connect("/ride-updates", Some("tok")),
            r#"40/ride-updates,{"token":"tok"}"#
        );
        assert_eq!(encode_connect("/", None), "40");
        assert_eq!(encode_disconnect("/ride-updates"), "41/ride-updates,");
        assert_eq!(
            encode_event(
                "/ride-updates",
                &PushFrame::new("ride:subscribe", json!({ "rideId": "ride_123" }))
            ),
            r#"42/ride-updates,["ride:subscribe",{"rideId":"ride_123"}]"#
        );
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("https://api.example.com/"),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("http://localhost:3000"),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket"
        );
    }
}
