//! Ride data model
//!
//! Field names follow the backend's camelCase JSON. Deserialization is
//! tolerant of the aliases the ride endpoints and push events use
//! interchangeably (`_id`/`id`, `lat`/`latitude`, `pickupLocation`/`pickup`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ============================================================================
// Ride identifier
// ============================================================================

/// Opaque ride key. Every tracking structure is indexed by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RideId(String);

impl RideId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RideId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RideId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&RideId> for RideId {
    fn from(id: &RideId) -> Self {
        id.clone()
    }
}

impl Serialize for RideId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RideId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Some endpoints emit numeric ids.
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(id) => Ok(RideId(id)),
            serde_json::Value::Number(id) => Ok(RideId(id.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "ride id must be a string or number, got {}",
                other
            ))),
        }
    }
}

// ============================================================================
// Ride status
// ============================================================================

/// Lifecycle status of a ride.
///
/// ```text
/// PENDING ──> DRIVER_ASSIGNED ──> ARRIVED ──> IN_PROGRESS ──> COMPLETED
///    │              │                │
///    └──────────────┴────────────────┴──────> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RideStatus {
    Pending,
    DriverAssigned,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 6] = [
        RideStatus::Pending,
        RideStatus::DriverAssigned,
        RideStatus::Arrived,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    /// `COMPLETED` and `CANCELLED` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "PENDING",
            RideStatus::DriverAssigned => "DRIVER_ASSIGNED",
            RideStatus::Arrived => "ARRIVED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether `next` is a lifecycle edge from `self`.
    ///
    /// Advisory only: the server is authoritative and out-of-order statuses
    /// are still applied.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Pending, DriverAssigned)
                | (DriverAssigned, Arrived)
                | (Arrived, InProgress)
                | (InProgress, Completed)
                | (Pending | DriverAssigned | Arrived, Cancelled)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown ride status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RideStatus {
    type Err = UnknownStatus;

    /// Accepts `DRIVER_ASSIGNED`, `driver_assigned`, `driver-assigned` and
    /// `Driver Assigned`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        RideStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl Serialize for RideStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RideStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Authoritative ride state. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSnapshot {
    /// Filled in from the tracked ride when a push payload omits it.
    #[serde(default, alias = "_id", alias = "rideId")]
    pub id: RideId,
    pub status: RideStatus,
    #[serde(
        default,
        alias = "pickupLocation",
        alias = "pickupCoordinates",
        skip_serializing_if = "Option::is_none"
    )]
    pub pickup: Option<Coordinates>,
    #[serde(
        default,
        alias = "dropoffLocation",
        alias = "dropOffLocation",
        alias = "dropoffCoordinates",
        skip_serializing_if = "Option::is_none"
    )]
    pub dropoff: Option<Coordinates>,
    #[serde(
        default,
        alias = "fareAmount",
        alias = "price",
        skip_serializing_if = "Option::is_none"
    )]
    pub fare: Option<f64>,
    #[serde(default, alias = "paymentMethod", skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RideSnapshot {
    pub fn new(id: impl Into<RideId>, status: RideStatus) -> Self {
        Self {
            id: id.into(),
            status,
            pickup: None,
            dropoff: None,
            fare: None,
            payment_mode: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Vehicle descriptor: either a free-form label or structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Vehicle {
    Label(String),
    #[serde(rename_all = "camelCase")]
    Details {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        make: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
        #[serde(
            default,
            alias = "plate",
            alias = "licensePlate",
            skip_serializing_if = "Option::is_none"
        )]
        plate_number: Option<String>,
    },
}

impl Vehicle {
    /// Single-line description, e.g. `"White Toyota Prius (KA-01-1234)"`.
    pub fn describe(&self) -> String {
        match self {
            Vehicle::Label(label) => label.clone(),
            Vehicle::Details {
                make,
                model,
                color,
                plate_number,
            } => {
                let name = [color, make, model]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                match plate_number {
                    Some(plate) if name.is_empty() => plate.clone(),
                    Some(plate) => format!("{} ({})", name, plate),
                    None => name,
                }
            }
        }
    }
}

/// Driver state. Lives independently of [`RideSnapshot`] and is cleared when
/// the ride terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSnapshot {
    #[serde(default, alias = "_id", alias = "driverId")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "phoneNumber", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<Vehicle>,
    #[serde(default, alias = "currentLocation", skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
}

/// Estimated time of arrival, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eta {
    pub minutes: f64,
}

impl Eta {
    pub fn from_minutes(minutes: f64) -> Self {
        Self { minutes }
    }

    /// Negative and non-finite values saturate to zero.
    pub fn as_duration(&self) -> Duration {
        if self.minutes.is_finite() && self.minutes > 0.0 {
            Duration::from_secs_f64(self.minutes * 60.0)
        } else {
            Duration::ZERO
        }
    }
}

/// Payload for creating a ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fare: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<String>,
}

impl CreateRideRequest {
    pub fn new(pickup: Coordinates, dropoff: Coordinates) -> Self {
        Self {
            pickup,
            dropoff,
            pickup_address: None,
            dropoff_address: None,
            fare: None,
            payment_mode: None,
        }
    }

    pub fn with_addresses(mut self, pickup: impl Into<String>, dropoff: impl Into<String>) -> Self {
        self.pickup_address = Some(pickup.into());
        self.dropoff_address = Some(dropoff.into());
        self
    }

    pub fn with_fare(mut self, fare: f64) -> Self {
        self.fare = Some(fare);
        self
    }

    pub fn with_payment_mode(mut self, mode: impl Into<String>) -> Self {
        self.payment_mode = Some(mode.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing_is_tolerant() {
        assert_eq!("DRIVER_ASSIGNED".parse::<RideStatus>(), Ok(RideStatus::DriverAssigned));
        assert_eq!("driver_assigned".parse::<RideStatus>(), Ok(RideStatus::DriverAssigned));
        assert_eq!("in-progress".parse::<RideStatus>(), Ok(RideStatus::InProgress));
        assert_eq!(" completed ".parse::<RideStatus>(), Ok(RideStatus::Completed));
        assert!("teleported".parse::<RideStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = RideStatus::ALL
            .into_iter()
            .filter(RideStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![RideStatus::Completed, RideStatus::Cancelled]);
    }

    #[test]
    fn test_lifecycle_edges() {
        use RideStatus::*;
        assert!(Pending.can_transition_to(DriverAssigned));
        assert!(Arrived.can_transition_to(Cancelled));
        assert!(!InProgress.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Arrived));
    }

    #[test]
    fn test_snapshot_aliases() {
        let snapshot: RideSnapshot = serde_json::from_value(json!({
            "_id": "ride_123",
            "status": "pending",
            "pickupLocation": { "lat": 12.97, "lng": 77.59 },
            "dropoffLocation": { "latitude": 12.93, "longitude": 77.62 },
            "fareAmount": 245.5,
            "paymentMode": "CASH",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(snapshot.id.as_str(), "ride_123");
        assert_eq!(snapshot.status, RideStatus::Pending);
        assert_eq!(snapshot.pickup, Some(Coordinates::new(12.97, 77.59)));
        assert_eq!(snapshot.dropoff, Some(Coordinates::new(12.93, 77.62)));
        assert_eq!(snapshot.fare, Some(245.5));
        assert_eq!(snapshot.payment_mode.as_deref(), Some("CASH"));
        assert!(snapshot.created_at.is_some());
        assert!(snapshot.updated_at.is_none());
    }

    #[test]
    fn test_numeric_ride_id() {
        let snapshot: RideSnapshot =
            serde_json::from_value(json!({ "id": 42, "status": "ARRIVED" })).unwrap();
        assert_eq!(snapshot.id.as_str(), "42");
    }

    #[test]
    fn test_vehicle_descriptions() {
        let driver: DriverSnapshot = serde_json::from_value(json!({
            "_id": "drv_1",
            "name": "Asha",
            "phoneNumber": "+911234567890",
            "vehicle": { "make": "Toyota", "model": "Prius", "color": "White", "plate": "KA-01-1234" },
            "currentLocation": { "lat": 1.0, "lng": 2.0 }
        }))
        .unwrap();

        assert_eq!(driver.id, "drv_1");
        assert_eq!(
            driver.vehicle.as_ref().map(Vehicle::describe).as_deref(),
            Some("White Toyota Prius (KA-01-1234)")
        );

        let labelled: DriverSnapshot =
            serde_json::from_value(json!({ "id": "drv_2", "name": "Ravi", "vehicle": "Blue hatchback" }))
                .unwrap();
        assert_eq!(labelled.vehicle, Some(Vehicle::Label("Blue hatchback".to_string())));
    }

    #[test]
    fn test_eta_duration() {
        assert_eq!(Eta::from_minutes(2.5).as_duration(), Duration::from_secs(150));
        assert_eq!(Eta::from_minutes(-1.0).as_duration(), Duration::ZERO);
        assert_eq!(Eta::from_minutes(f64::NAN).as_duration(), Duration::ZERO);
    }

    #[test]
    fn test_create_request_serialization() {
        let request = CreateRideRequest::new(Coordinates::new(1.0, 2.0), Coordinates::new(3.0, 4.0))
            .with_payment_mode("CARD");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["paymentMode"], "CARD");
        assert_eq!(value["dropoff"]["latitude"], 3.0);
        assert!(value.get("fare").is_none());
    }
}
