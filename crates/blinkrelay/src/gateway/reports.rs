//! Inbound device reports.
//!
//! These are deserialized straight from HTTP bodies and WebSocket frames, so
//! every field is optional here; the gateway decides what is required.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A timestamp as sent by a device: epoch milliseconds or RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeviceTimestamp {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 / ISO 8601 text.
    Text(String),
}

impl DeviceTimestamp {
    /// Parse into a UTC instant, or `None` if the value is not a valid time.
    #[must_use]
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Periodic liveness report.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    /// Reporting device.
    pub device_id: Option<String>,
    /// Device-side time of the heartbeat.
    #[serde(alias = "lastSeen")]
    pub ts: Option<DeviceTimestamp>,
    /// Signal strength in dBm.
    pub rssi: Option<i32>,
    /// Battery level in percent.
    pub battery: Option<f64>,
}

/// Blink-count report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkReport {
    /// Reporting device.
    pub device_id: Option<String>,
    /// Cumulative count of the current burst. Defaults to 1.
    pub blink_count: Option<u32>,
    /// Device-side time of the event.
    pub timestamp: Option<DeviceTimestamp>,
}

/// Light command request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightReport {
    /// Target device.
    pub device_id: Option<String>,
    /// Command name.
    pub command: Option<String>,
    /// Requested state.
    pub state: Option<Value>,
}

/// Extract a non-blank device id.
pub(crate) fn require_device_id(device_id: Option<&str>) -> Result<String> {
    device_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(Error::missing("deviceId"))
}
