//! Typed view over Traccar socket records.
//!
//! The supervisor forwards records untouched. Consumers that know the
//! upstream is Traccar can use [`TraccarMessage::from_payload`] to read the
//! `devices`, `positions` and `events` arrays a record may carry. Unknown
//! fields are ignored and missing arrays are empty.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{error::TransportResult, observer::Payload};

const KNOTS_TO_KMH: f64 = 1.852;

/// A tracked device as reported by the upstream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub id: i64,
    pub name: Option<String>,
    pub unique_id: Option<String>,
    /// `online`, `offline` or `unknown`.
    pub status: Option<String>,
    pub last_update: Option<String>,
    pub position_id: Option<i64>,
}

impl Device {
    /// Whether the upstream currently sees the device.
    pub fn is_online(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("online"))
    }
}

/// A position fix.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Position {
    pub id: i64,
    pub device_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in knots.
    pub speed: f64,
    /// Heading in degrees.
    pub course: f64,
    pub altitude: Option<f64>,
    pub fix_time: Option<String>,
    pub server_time: Option<String>,
    pub attributes: Map<String, Value>,
}

impl Position {
    pub fn speed_kmh(&self) -> f64 {
        self.speed * KNOTS_TO_KMH
    }

    /// Ignition flag from the device attributes, if reported.
    pub fn ignition(&self) -> Option<bool> {
        self.attributes.get("ignition").and_then(Value::as_bool)
    }
}

/// A device event (geofence enter/exit, ignition, alarms...).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub device_id: i64,
    pub event_time: Option<String>,
    pub position_id: Option<i64>,
    pub geofence_id: Option<i64>,
    pub attributes: Map<String, Value>,
}

/// The arrays one socket record may carry.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraccarMessage {
    pub devices: Vec<Device>,
    pub positions: Vec<Position>,
    pub events: Vec<Event>,
}

impl TraccarMessage {
    /// Read a record delivered to [`crate::StreamObserver::on_payload`].
    pub fn from_payload(payload: &Payload) -> TransportResult<Self> {
        Ok(Self::deserialize(payload)?)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.positions.is_empty() && self.events.is_empty()
    }
}
