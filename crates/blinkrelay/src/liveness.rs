//! Liveness monitoring.
//!
//! Two periodic jobs run against the gateway's registry: a sweep that marks
//! silent devices offline, and an announce that republishes every device's
//! status so dashboards that missed a transition converge.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::gateway::PresenceGateway;
use crate::registry::{DeviceRecord, Registry};
use crate::shutdown::ShutdownHandle;

/// Timeout rules and cadence for presence tracking.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    timeout: chrono::Duration,
    sweep_interval: Duration,
    announce_interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        timeout: chrono::Duration,
        sweep_interval: Duration,
        announce_interval: Duration,
    ) -> Self {
        Self {
            timeout,
            sweep_interval,
            announce_interval,
        }
    }

    /// Create a monitor from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.heartbeat_timeout(),
            config.sweep_interval(),
            config.announce_interval(),
        )
    }

    /// Heartbeat timeout.
    #[must_use]
    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    /// Mark every online device silent for longer than the timeout offline.
    ///
    /// Returns the demoted records. A device already offline is never
    /// returned again.
    pub fn sweep(&self, registry: &mut Registry, now: DateTime<Utc>) -> Vec<DeviceRecord> {
        registry
            .stale_online(now, self.timeout)
            .iter()
            .filter_map(|device_id| registry.mark_offline(device_id))
            .collect()
    }

    /// Current status of every device, for periodic re-announcement.
    #[must_use]
    pub fn announce(&self, registry: &Registry) -> Vec<DeviceRecord> {
        registry.list_all()
    }

    /// Run sweep and announce on their intervals until shutdown.
    ///
    /// The first tick of each job fires one full interval after start.
    pub async fn run(self, gateway: Arc<PresenceGateway>, shutdown: ShutdownHandle) {
        let start = Instant::now();
        let mut sweep = interval_at(start + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut announce = interval_at(start + self.announce_interval, self.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            timeout_secs = self.timeout.num_seconds(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let demoted = gateway.sweep_offline(&self);
                    if demoted > 0 {
                        debug!(demoted, "Liveness sweep");
                    }
                }
                _ = announce.tick() => {
                    let announced = gateway.announce_status(&self);
                    debug!(announced, "Status announce");
                }
                () = shutdown.wait() => break,
            }
        }

        info!("Liveness monitor stopped");
    }
}
