//! Device registry.
//!
//! Holds the last-known presence state of every device that has ever sent a
//! heartbeat. Pure in-memory data structure: the caller supplies "now" and is
//! responsible for broadcasting the transitions it causes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// A heartbeat arrived within the timeout window.
    Online,
    /// The device has been silent for longer than the timeout window.
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Ancillary device metrics carried alongside heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Received signal strength, in dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,

    /// Battery level, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

impl Telemetry {
    /// Whether any field is present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.rssi.is_some() || self.battery.is_some()
    }

    /// Overlay the fields present in `newer` on top of `self`.
    #[must_use]
    pub fn merged_with(self, newer: Telemetry) -> Telemetry {
        Telemetry {
            rssi: newer.rssi.or(self.rssi),
            battery: newer.battery.or(self.battery),
        }
    }
}

/// Last-known state of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Stable identifier of the physical device.
    pub device_id: String,

    /// Current presence status.
    pub status: DeviceStatus,

    /// Timestamp reported by the device (or receipt time if it sent none).
    pub last_seen: DateTime<Utc>,

    /// Receipt time of the last heartbeat. Timeouts are computed from this,
    /// never from `last_seen`, so device clock skew cannot keep a device online.
    pub updated_at: DateTime<Utc>,

    /// Most recent telemetry values.
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

/// In-memory registry of device records, keyed by device id.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<String, DeviceRecord>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat.
    ///
    /// Creates the record on first contact. Always leaves the device online
    /// with `updated_at = now`. Telemetry fields absent from this heartbeat
    /// keep their previous values.
    pub fn upsert_heartbeat(
        &mut self,
        device_id: &str,
        last_seen: Option<DateTime<Utc>>,
        telemetry: Telemetry,
        now: DateTime<Utc>,
    ) -> DeviceRecord {
        let last_seen = last_seen.unwrap_or(now);
        let record = self
            .devices
            .entry(device_id.to_string())
            .and_modify(|record| {
                record.status = DeviceStatus::Online;
                record.last_seen = last_seen;
                record.updated_at = now;
                record.telemetry = record.telemetry.merged_with(telemetry);
            })
            .or_insert_with(|| DeviceRecord {
                device_id: device_id.to_string(),
                status: DeviceStatus::Online,
                last_seen,
                updated_at: now,
                telemetry,
            });
        record.clone()
    }

    /// Demote a device to offline.
    ///
    /// Returns the updated record, or `None` if the device is unknown or was
    /// already offline.
    pub fn mark_offline(&mut self, device_id: &str) -> Option<DeviceRecord> {
        let record = self.devices.get_mut(device_id)?;
        if record.status == DeviceStatus::Offline {
            return None;
        }
        record.status = DeviceStatus::Offline;
        Some(record.clone())
    }

    /// Look up a device.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.get(device_id).cloned()
    }

    /// Snapshot of every known device, in no particular order.
    #[must_use]
    pub fn list_all(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    /// Ids of online devices whose last heartbeat is older than `timeout`.
    pub(crate) fn stale_online(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Vec<String> {
        self.devices
            .values()
            .filter(|r| r.status == DeviceStatus::Online && now - r.updated_at > timeout)
            .map(|r| r.device_id.clone())
            .collect()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has ever reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
