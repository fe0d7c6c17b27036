//! Blink interpretation.
//!
//! Turns each device's stream of cumulative blink counts into discrete
//! intents. Every device owns one [`BlinkStateMachine`] and at most one
//! pending deadline timer. A new event always replaces the previous timer,
//! and a timer that fires after being replaced finds a newer generation and
//! does nothing.
//!
//! ```text
//!   BlinkSignal ──▶ BlinkInterpreter::handle ──▶ BlinkStateMachine
//!                          │                         │
//!                          │ spawn timer(gen)        │ Intent
//!                          ▼                         ▼
//!                   expire(gen) ─ stale? no-op   intents queue
//! ```

mod intent;
pub mod window;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub use intent::{Intent, InterpretedIntent, MenuOption, OptionKind};
pub use window::{BlinkOutcome, BlinkStateMachine, ClosedWindow, WindowState, WindowTiming};

use crate::config::Config;

/// One blink-count report, already validated by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlinkSignal {
    /// Reporting device.
    pub device_id: String,
    /// Cumulative count of the current burst.
    pub count: u32,
}

/// Observable state of one device's interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Whether a window is open (accumulating or holding).
    pub open: bool,
    /// Count of the open window.
    pub count: Option<u32>,
    /// Intent already emitted by the open window.
    pub resolved: Option<Intent>,
    /// Current cursor position.
    pub cursor: usize,
}

#[derive(Debug)]
struct DeviceSlot {
    machine: BlinkStateMachine,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    slots: Mutex<HashMap<String, DeviceSlot>>,
    timing: WindowTiming,
    menu: Vec<MenuOption>,
    intents: mpsc::Sender<InterpretedIntent>,
}

/// Per-device blink interpreter.
///
/// Cheap to clone; clones share state. Must be used from within a tokio
/// runtime because deadline timers are spawned tasks.
#[derive(Debug, Clone)]
pub struct BlinkInterpreter {
    shared: Arc<Shared>,
}

impl BlinkInterpreter {
    /// Create an interpreter that emits intents on `intents`.
    #[must_use]
    pub fn new(
        timing: WindowTiming,
        menu: Vec<MenuOption>,
        intents: mpsc::Sender<InterpretedIntent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                timing,
                menu,
                intents,
            }),
        }
    }

    /// Create an interpreter from configuration.
    #[must_use]
    pub fn from_config(config: &Config, intents: mpsc::Sender<InterpretedIntent>) -> Self {
        let timing = WindowTiming {
            window: config.window(),
            emergency_window: config.emergency_window(),
        };
        Self::new(timing, config.interpreter.menu.clone(), intents)
    }

    /// The menu the cursor moves through.
    #[must_use]
    pub fn menu(&self) -> &[MenuOption] {
        &self.shared.menu
    }

    /// Feed one blink count for a device.
    ///
    /// Returns the intent emitted by this event, if any. The same intent is
    /// also pushed onto the intent queue.
    pub fn handle(&self, device_id: &str, count: u32) -> Option<Intent> {
        let now = Instant::now();

        let outcome = {
            let mut slots = self.shared.lock_slots();
            let slot = slots
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceSlot {
                    machine: BlinkStateMachine::new(self.shared.menu.len(), self.shared.timing),
                    generation: 0,
                    timer: None,
                });

            let outcome = slot.machine.on_blink(count, now);

            slot.generation = slot.generation.wrapping_add(1);
            if let Some(previous) = slot.timer.take() {
                previous.abort();
            }
            slot.timer = Some(self.spawn_timer(device_id, slot.generation, outcome.deadline));

            outcome
        };

        trace!(device_id, count, "blink window updated");

        if let Some(intent) = outcome.intent {
            self.emit(device_id, intent);
        }
        outcome.intent
    }

    /// Snapshot of a device's window, or `None` if it never blinked.
    #[must_use]
    pub fn snapshot(&self, device_id: &str) -> Option<WindowSnapshot> {
        let slots = self.shared.lock_slots();
        let slot = slots.get(device_id)?;
        let snapshot = match slot.machine.state() {
            WindowState::Idle => WindowSnapshot {
                open: false,
                count: None,
                resolved: None,
                cursor: slot.machine.cursor(),
            },
            WindowState::Open(window) => WindowSnapshot {
                open: true,
                count: Some(window.count),
                resolved: window.resolved,
                cursor: slot.machine.cursor(),
            },
        };
        Some(snapshot)
    }

    /// Consume blink signals until the sending side closes.
    pub async fn run(self, mut signals: mpsc::Receiver<BlinkSignal>) {
        info!("Blink interpreter started");
        while let Some(signal) = signals.recv().await {
            self.handle(&signal.device_id, signal.count);
        }
        info!("Blink interpreter stopped");
    }

    fn spawn_timer(&self, device_id: &str, generation: u64, deadline: Instant) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(&device_id, generation);
            }
        })
    }

    fn emit(&self, device_id: &str, intent: Intent) {
        let option = match intent {
            Intent::Navigate { cursor } => self.shared.menu.get(cursor).cloned(),
            Intent::Select { index } => self.shared.menu.get(index).cloned(),
            Intent::Emergency => None,
        };

        info!(device_id, %intent, "Blink intent resolved");

        let interpreted = InterpretedIntent {
            device_id: device_id.to_string(),
            intent,
            option,
            at: Utc::now(),
        };
        if let Err(err) = self.shared.intents.try_send(interpreted) {
            warn!(device_id, %intent, "Dropping intent: {err}");
        }
    }
}

impl Shared {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, DeviceSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, device_id: &str, generation: u64) {
        let mut slots = self.lock_slots();
        let Some(slot) = slots.get_mut(device_id) else {
            return;
        };
        if slot.generation != generation {
            trace!(device_id, generation, "superseded timer fired");
            return;
        }
        slot.timer = None;

        match slot.machine.on_deadline(Instant::now()) {
            Some(ClosedWindow {
                count,
                resolved: None,
            }) => debug!(device_id, count, "Blink window discarded without intent"),
            Some(ClosedWindow {
                resolved: Some(intent),
                ..
            }) => trace!(device_id, %intent, "hold elapsed"),
            None => {}
        }
    }
}
