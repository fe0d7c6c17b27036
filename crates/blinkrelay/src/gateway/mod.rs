//! Presence gateway.
//!
//! Front door for devices and dashboards. Validates device reports, applies
//! them to the [`Registry`], and fans the resulting notifications out to
//! every subscriber through the [`Hub`].
//!
//! Registry mutations and the publishes they cause happen under one lock,
//! so every subscriber sees status transitions in the order they were
//! applied, and a new subscriber's snapshot is never interleaved with a
//! concurrent update.

pub mod hub;
pub mod notification;
pub mod reports;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use hub::{Hub, SubscriberId, Subscription};
pub use notification::{
    BlinkEvent, DispatchFailure, LightEvent, Notification, StatusNotice, TelemetryNotice,
};
pub use reports::{BlinkReport, DeviceTimestamp, HeartbeatReport, LightReport};

use crate::clock::Clock;
use crate::error::Result;
use crate::interpreter::{BlinkSignal, InterpretedIntent};
use crate::liveness::LivenessMonitor;
use crate::registry::{DeviceRecord, DeviceStatus, Registry, Telemetry};
use reports::require_device_id;

/// Presence gateway.
#[derive(Debug)]
pub struct PresenceGateway {
    registry: Mutex<Registry>,
    hub: Arc<Hub>,
    clock: Arc<dyn Clock>,
    blinks: Option<mpsc::Sender<BlinkSignal>>,
}

impl PresenceGateway {
    /// Create a gateway with empty registry and no subscribers.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, subscriber_queue: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            hub: Arc::new(Hub::new(subscriber_queue)),
            clock,
            blinks: None,
        }
    }

    /// Forward accepted blink reports to an interpreter.
    #[must_use]
    pub fn with_interpreter(mut self, blinks: mpsc::Sender<BlinkSignal>) -> Self {
        self.blinks = Some(blinks);
        self
    }

    /// Current time according to the gateway's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Apply a heartbeat.
    ///
    /// Publishes `status`, then `telemetry` when the heartbeat carried any.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `deviceId` is missing or blank.
    pub fn report_heartbeat(&self, report: HeartbeatReport) -> Result<DeviceRecord> {
        let device_id = require_device_id(report.device_id.as_deref())?;
        let telemetry = Telemetry {
            rssi: report.rssi,
            battery: report.battery,
        };
        let device_time = report.ts.as_ref().and_then(DeviceTimestamp::parse);
        if report.ts.is_some() && device_time.is_none() {
            debug!(device_id = %device_id, "Unparseable heartbeat timestamp, using receipt time");
        }

        let mut registry = self.lock_registry();
        let now = self.clock.now();
        let was_online = registry
            .get(&device_id)
            .is_some_and(|r| r.status == DeviceStatus::Online);
        let record = registry.upsert_heartbeat(&device_id, device_time, telemetry, now);

        if was_online {
            debug!(device_id = %device_id, "Heartbeat");
        } else {
            info!(device_id = %device_id, "Device online");
        }

        self.hub.publish(&Notification::status(&record));
        if telemetry.is_present() {
            self.hub.publish(&Notification::Telemetry(TelemetryNotice {
                device_id: record.device_id.clone(),
                rssi: telemetry.rssi,
                battery: telemetry.battery,
                timestamp: record.last_seen,
            }));
        }
        drop(registry);

        Ok(record)
    }

    /// Accept a blink-count report.
    ///
    /// Publishes `blinkCount` and hands the count to the interpreter. Does not
    /// touch presence state.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `deviceId` is missing or blank.
    pub fn report_blink(&self, report: BlinkReport) -> Result<BlinkEvent> {
        let device_id = require_device_id(report.device_id.as_deref())?;
        let count = report.blink_count.unwrap_or(1);
        let now = self.clock.now();
        let event = BlinkEvent {
            device_id,
            blink_count: count,
            timestamp: report
                .timestamp
                .as_ref()
                .and_then(DeviceTimestamp::parse)
                .unwrap_or(now),
        };

        debug!(device_id = %event.device_id, count, "Blink report");
        self.hub.publish(&Notification::BlinkCount(event.clone()));

        if let Some(blinks) = &self.blinks {
            let signal = BlinkSignal {
                device_id: event.device_id.clone(),
                count,
            };
            if let Err(err) = blinks.try_send(signal) {
                warn!(device_id = %event.device_id, "Blink not interpreted: {err}");
            }
        }

        Ok(event)
    }

    /// Relay an opaque light-state report to every subscriber.
    pub fn report_light_state(&self, state: Value) {
        debug!("Light state update");
        self.hub.publish(&Notification::LightState(state));
    }

    /// Publish a light command for a device.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `deviceId` is missing or blank.
    pub fn send_light_command(&self, report: LightReport) -> Result<LightEvent> {
        let device_id = require_device_id(report.device_id.as_deref())?;
        let event = LightEvent {
            device_id,
            command: report.command,
            state: report.state,
            timestamp: self.clock.now(),
        };
        info!(device_id = %event.device_id, command = ?event.command, "Light command");
        self.hub.publish(&Notification::LightCommand(event.clone()));
        Ok(event)
    }

    /// Register a subscriber.
    ///
    /// The subscription's queue starts with one `status` per known device,
    /// followed by every notification published afterwards.
    pub fn subscribe(&self) -> Subscription {
        let registry = self.lock_registry();
        let snapshot = registry.list_all().iter().map(Notification::status).collect();
        let subscription = self.hub.register(snapshot);
        drop(registry);
        subscription
    }

    /// Resend one `status` per known device to one subscriber.
    ///
    /// Returns how many statuses were queued.
    pub fn resync(&self, subscriber: SubscriberId) -> usize {
        let registry = self.lock_registry();
        let queued = registry
            .list_all()
            .iter()
            .filter(|record| self.hub.send_to(subscriber, Notification::status(record)))
            .count();
        debug!(subscriber, queued, "Resynced subscriber");
        queued
    }

    /// Publish an intent resolved by the interpreter.
    pub fn publish_intent(&self, intent: &InterpretedIntent) {
        self.hub.publish(&Notification::Intent(intent.clone()));
    }

    /// Publish a failed downstream delivery.
    pub fn publish_dispatch_failure(&self, failure: DispatchFailure) {
        self.hub.publish(&Notification::DispatchFailed(failure));
    }

    /// Demote silent devices and publish their new status.
    ///
    /// Returns how many devices went offline.
    pub fn sweep_offline(&self, monitor: &LivenessMonitor) -> usize {
        let mut registry = self.lock_registry();
        let now = self.clock.now();
        let demoted = monitor.sweep(&mut registry, now);
        for record in &demoted {
            info!(device_id = %record.device_id, "Device offline");
            self.hub.publish(&Notification::status(record));
        }
        demoted.len()
    }

    /// Publish the current status of every device.
    ///
    /// Returns how many statuses were published.
    pub fn announce_status(&self, monitor: &LivenessMonitor) -> usize {
        let registry = self.lock_registry();
        let records = monitor.announce(&registry);
        for record in &records {
            self.hub.publish(&Notification::status(record));
        }
        records.len()
    }

    /// Look up one device.
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.lock_registry().get(device_id)
    }

    /// Every known device, sorted by id.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices = self.lock_registry().list_all();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
