//! Notifications fanned out to subscribers.
//!
//! Every notification has an event name and a JSON payload. The WebSocket
//! transport sends `{"event": name, "data": payload}` frames; the SSE
//! transport sends the same name as the SSE event and the same payload as
//! its data, so both carry identical content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interpreter::{Intent, InterpretedIntent};
use crate::registry::{DeviceRecord, DeviceStatus};

/// Presence status of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotice {
    /// Device the status belongs to.
    pub device_id: String,
    /// Current status.
    pub status: DeviceStatus,
    /// Device-reported timestamp of the last heartbeat.
    pub last_seen: DateTime<Utc>,
    /// Receipt time of the last heartbeat.
    pub updated_at: DateTime<Utc>,
}

impl From<&DeviceRecord> for StatusNotice {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            status: record.status,
            last_seen: record.last_seen,
            updated_at: record.updated_at,
        }
    }
}

/// Telemetry carried by a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryNotice {
    /// Reporting device.
    pub device_id: String,
    /// Signal strength, if reported.
    pub rssi: Option<i32>,
    /// Battery level, if reported.
    pub battery: Option<f64>,
    /// Device-reported timestamp of the heartbeat.
    pub timestamp: DateTime<Utc>,
}

/// A raw blink-count report, forwarded for live visualization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlinkEvent {
    /// Reporting device.
    pub device_id: String,
    /// Cumulative count of the current burst.
    pub blink_count: u32,
    /// Device-reported time of the event (or receipt time).
    pub timestamp: DateTime<Utc>,
}

/// A light command addressed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightEvent {
    /// Target device.
    pub device_id: String,
    /// Command name, passed through untouched.
    pub command: Option<String>,
    /// Requested state, passed through untouched.
    pub state: Option<Value>,
    /// Receipt time.
    pub timestamp: DateTime<Utc>,
}

/// A downstream delivery that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchFailure {
    /// Device whose intent could not be delivered.
    pub device_id: String,
    /// The undelivered intent.
    pub intent: Intent,
    /// Human-readable failure.
    pub error: String,
}

/// Everything a subscriber can receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Notification {
    /// Device presence.
    Status(StatusNotice),
    /// Device telemetry.
    Telemetry(TelemetryNotice),
    /// Raw blink-count event.
    BlinkCount(BlinkEvent),
    /// Opaque light-state report from a device.
    LightState(Value),
    /// Light command for a device.
    LightCommand(LightEvent),
    /// Intent resolved by the interpreter.
    Intent(InterpretedIntent),
    /// Downstream delivery failure.
    DispatchFailed(DispatchFailure),
}

impl Notification {
    /// Status notification for a record.
    #[must_use]
    pub fn status(record: &DeviceRecord) -> Self {
        Self::Status(StatusNotice::from(record))
    }

    /// Wire name of the event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Telemetry(_) => "telemetry",
            Self::BlinkCount(_) => "blinkCount",
            Self::LightState(_) => "lightState",
            Self::LightCommand(_) => "lightCommand",
            Self::Intent(_) => "intent",
            Self::DispatchFailed(_) => "dispatchFailed",
        }
    }

    /// JSON payload of the event.
    #[must_use]
    pub fn data(&self) -> Value {
        let data = match self {
            Self::Status(notice) => serde_json::to_value(notice),
            Self::Telemetry(notice) => serde_json::to_value(notice),
            Self::BlinkCount(event) => serde_json::to_value(event),
            Self::LightState(state) => Ok(state.clone()),
            Self::LightCommand(event) => serde_json::to_value(event),
            Self::Intent(intent) => serde_json::to_value(intent),
            Self::DispatchFailed(failure) => serde_json::to_value(failure),
        };
        data.unwrap_or(Value::Null)
    }

    /// Full `{"event", "data"}` frame as text.
    #[must_use]
    pub fn to_frame(&self) -> String {
        serde_json::json!({
            "event": self.event_name(),
            "data": self.data(),
        })
        .to_string()
    }

    /// Device this notification concerns, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Status(notice) => Some(&notice.device_id),
            Self::Telemetry(notice) => Some(&notice.device_id),
            Self::BlinkCount(event) => Some(&event.device_id),
            Self::LightCommand(event) => Some(&event.device_id),
            Self::Intent(intent) => Some(&intent.device_id),
            Self::DispatchFailed(failure) => Some(&failure.device_id),
            Self::LightState(state) => state.get("deviceId").and_then(Value::as_str),
        }
    }
}
