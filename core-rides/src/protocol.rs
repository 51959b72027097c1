//! Ride-updates push protocol
//!
//! Maps named frames on the `/ride-updates` namespace to typed events.
//!
//! | Event              | Direction | Payload                                   |
//! |--------------------|-----------|-------------------------------------------|
//! | `ride:subscribe`   | out       | `{ rideId }`                              |
//! | `ride:unsubscribe` | out       | `{ rideId }`                              |
//! | `ride:subscribed`  | in        | handshake ack                             |
//! | `ride:update`      | in        | ride snapshot, bare or `{ ride }`         |
//! | `ride:status`      | in        | `{ status, ride? }`                       |
//! | `driver:update`    | in        | driver snapshot, bare or `{ driver }`     |
//! | `eta:update`       | in        | minutes, `{ eta }` or `{ etaMinutes }`    |
//! | `error`            | in        | `{ message }` or a string                 |

use bridge_traits::PushFrame;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::TrackingError;
use crate::state::RideUpdate;
use crate::types::{DriverSnapshot, Eta, RideId, RideSnapshot, RideStatus};

pub const RIDE_SUBSCRIBE: &str = "ride:subscribe";
pub const RIDE_UNSUBSCRIBE: &str = "ride:unsubscribe";
pub const RIDE_SUBSCRIBED: &str = "ride:subscribed";
pub const RIDE_UPDATE: &str = "ride:update";
pub const RIDE_STATUS: &str = "ride:status";
pub const DRIVER_UPDATE: &str = "driver:update";
pub const ETA_UPDATE: &str = "eta:update";
pub const SERVER_ERROR: &str = "error";

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Subscribed,
    Update(RideUpdate),
    ServerError(String),
    /// Not a ride-updates event; forwarded raw only.
    Other,
}

pub fn subscribe_frame(ride_id: &RideId) -> PushFrame {
    PushFrame::new(RIDE_SUBSCRIBE, json!({ "rideId": ride_id }))
}

pub fn unsubscribe_frame(ride_id: &RideId) -> PushFrame {
    PushFrame::new(RIDE_UNSUBSCRIBE, json!({ "rideId": ride_id }))
}

/// Decode a frame received on the channel of `ride_id`.
///
/// Ride snapshots without an id are attributed to `ride_id`.
pub fn decode(ride_id: &RideId, frame: &PushFrame) -> Result<InboundEvent, TrackingError> {
    let payload = &frame.payload;
    let event = match frame.event.as_str() {
        RIDE_SUBSCRIBED => InboundEvent::Subscribed,
        RIDE_UPDATE => {
            let ride = parse_ride(ride_id, unwrap_field(payload, "ride"))
                .map_err(|e| invalid(frame, e))?;
            InboundEvent::Update(RideUpdate::Snapshot(ride))
        }
        RIDE_STATUS => {
            let (status, ride) =
                parse_status_payload(ride_id, payload).map_err(|e| invalid(frame, e))?;
            InboundEvent::Update(RideUpdate::Status { status, ride })
        }
        DRIVER_UPDATE => {
            let driver: DriverSnapshot =
                parse(unwrap_field(payload, "driver")).map_err(|e| invalid(frame, e))?;
            InboundEvent::Update(RideUpdate::Driver(driver))
        }
        ETA_UPDATE => {
            let eta = parse_eta(payload).ok_or_else(|| {
                invalid(frame, format!("expected minutes, got {}", payload))
            })?;
            InboundEvent::Update(RideUpdate::Eta(eta))
        }
        SERVER_ERROR => InboundEvent::ServerError(error_message(payload)),
        _ => InboundEvent::Other,
    };
    Ok(event)
}

fn invalid(frame: &PushFrame, reason: impl std::fmt::Display) -> TrackingError {
    TrackingError::protocol(format!("invalid {} payload: {}", frame.event, reason))
}

fn parse<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

/// `{ field: inner }` -> `inner`; anything else is returned as-is.
fn unwrap_field<'a>(payload: &'a Value, field: &str) -> &'a Value {
    match payload.get(field) {
        Some(inner) if inner.is_object() => inner,
        _ => payload,
    }
}

fn parse_ride(ride_id: &RideId, value: &Value) -> Result<RideSnapshot, serde_json::Error> {
    let mut ride: RideSnapshot = parse(value)?;
    if ride.id.is_empty() {
        ride.id = ride_id.clone();
    }
    Ok(ride)
}

fn parse_status_payload(
    ride_id: &RideId,
    payload: &Value,
) -> Result<(RideStatus, Option<RideSnapshot>), String> {
    let ride = match payload.get("ride") {
        Some(value) if value.is_object() => {
            Some(parse_ride(ride_id, value).map_err(|e| e.to_string())?)
        }
        _ => None,
    };

    let status = match payload.get("status").or_else(|| payload.as_str().map(|_| payload)) {
        Some(Value::String(raw)) => raw.parse::<RideStatus>().map_err(|e| e.to_string())?,
        Some(other) => return Err(format!("status must be a string, got {}", other)),
        None => match &ride {
            Some(ride) => ride.status,
            None => return Err("missing status".to_string()),
        },
    };

    Ok((status, ride))
}

/// Minutes from `5`, `"5"`, `{ eta: 5 }` or `{ etaMinutes: 5 }`.
fn parse_eta(payload: &Value) -> Option<Eta> {
    let value = match payload {
        Value::Object(map) => map.get("etaMinutes").or_else(|| map.get("eta"))?,
        other => other,
    };
    let minutes = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    minutes.is_finite().then(|| Eta::from_minutes(minutes))
}

fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ride() -> RideId {
        RideId::from("ride_123")
    }

    fn decode_json(event: &str, payload: Value) -> Result<InboundEvent, TrackingError> {
        decode(&ride(), &PushFrame::new(event, payload))
    }

    #[test]
    fn test_intent_frames() {
        let frame = subscribe_frame(&ride());
        assert_eq!(frame.event, "ride:subscribe");
        assert_eq!(frame.payload, json!({ "rideId": "ride_123" }));
        assert_eq!(unsubscribe_frame(&ride()).event, "ride:unsubscribe");
    }

    #[test]
    fn test_ride_update_accepts_envelope_and_fills_id() {
        let bare = decode_json(RIDE_UPDATE, json!({ "status": "ARRIVED" })).unwrap();
        let wrapped =
            decode_json(RIDE_UPDATE, json!({ "ride": { "status": "ARRIVED" } })).unwrap();

        let expected = InboundEvent::Update(RideUpdate::Snapshot(RideSnapshot::new(
            "ride_123",
            RideStatus::Arrived,
        )));
        assert_eq!(bare, expected);
        assert_eq!(wrapped, expected);
    }

    #[test]
    fn test_status_payload_shapes() {
        assert_eq!(
            decode_json(RIDE_STATUS, json!({ "status": "driver_assigned" })).unwrap(),
            InboundEvent::Update(RideUpdate::Status {
                status: RideStatus::DriverAssigned,
                ride: None
            })
        );

        let with_ride = decode_json(
            RIDE_STATUS,
            json!({ "status": "IN_PROGRESS", "ride": { "_id": "ride_123", "status": "ARRIVED" } }),
        )
        .unwrap();
        assert!(matches!(
            with_ride,
            InboundEvent::Update(RideUpdate::Status {
                status: RideStatus::InProgress,
                ride: Some(_)
            })
        ));

        assert_eq!(
            decode_json(RIDE_STATUS, json!("COMPLETED")).unwrap(),
            InboundEvent::Update(RideUpdate::Status {
                status: RideStatus::Completed,
                ride: None
            })
        );
    }

    #[test]
    fn test_status_payload_errors() {
        let error = decode_json(RIDE_STATUS, json!({ "status": "warping" })).unwrap_err();
        assert_eq!(error.kind, crate::error::TrackingErrorKind::Protocol);
        assert!(decode_json(RIDE_STATUS, json!({})).is_err());
        assert!(decode_json(RIDE_STATUS, json!({ "status": 3 })).is_err());
    }

    #[test]
    fn test_eta_payload_shapes() {
        for payload in [json!(7), json!("7"), json!({ "eta": 7 }), json!({ "etaMinutes": 7.0 })] {
            assert_eq!(
                decode_json(ETA_UPDATE, payload).unwrap(),
                InboundEvent::Update(RideUpdate::Eta(Eta::from_minutes(7.0)))
            );
        }
        assert!(decode_json(ETA_UPDATE, json!({ "eta": null })).is_err());
    }

    #[test]
    fn test_driver_update() {
        let event = decode_json(
            DRIVER_UPDATE,
            json!({ "driver": { "_id": "drv_1", "name": "Asha" } }),
        )
        .unwrap();
        match event {
            InboundEvent::Update(RideUpdate::Driver(driver)) => assert_eq!(driver.name, "Asha"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_server_error_and_unknown_events() {
        assert_eq!(
            decode_json(SERVER_ERROR, json!({ "message": "Ride not found" })).unwrap(),
            InboundEvent::ServerError("Ride not found".to_string())
        );
        assert_eq!(
            decode_json(SERVER_ERROR, json!("Unauthorized")).unwrap(),
            InboundEvent::ServerError("Unauthorized".to_string())
        );
        assert_eq!(
            decode_json("chat:message", json!({ "text": "hi" })).unwrap(),
            InboundEvent::Other
        );
        assert_eq!(
            decode_json(RIDE_SUBSCRIBED, json!({ "rideId": "ride_123" })).unwrap(),
            InboundEvent::Subscribed
        );
    }
}
