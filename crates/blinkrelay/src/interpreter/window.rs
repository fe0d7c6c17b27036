//! Per-device blink window state machine.
//!
//! Pure and synchronous: the caller passes the current instant and owns the
//! timer that later calls [`BlinkStateMachine::on_deadline`].

use std::time::Duration;

use tokio::time::Instant;

use super::intent::Intent;

/// Burst count that moves the cursor.
pub const NAVIGATE_COUNT: u32 = 2;

/// Burst count that selects the option under the cursor.
pub const SELECT_COUNT: u32 = 3;

/// Burst count that raises an emergency.
pub const EMERGENCY_COUNT: u32 = 5;

/// Window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTiming {
    /// Timeout (and hold) below the emergency count.
    pub window: Duration,
    /// Timeout (and hold) from the emergency count up.
    pub emergency_window: Duration,
}

impl Default for WindowTiming {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            emergency_window: Duration::from_secs(3),
        }
    }
}

impl WindowTiming {
    /// How long a window stays open after an event carrying `count`.
    #[must_use]
    pub fn timeout_for(&self, count: u32) -> Duration {
        if count >= EMERGENCY_COUNT {
            self.emergency_window
        } else {
            self.window
        }
    }

    /// Minimum hold after `intent` was emitted.
    #[must_use]
    pub fn hold_for(&self, intent: Intent) -> Duration {
        match intent {
            Intent::Emergency => self.emergency_window,
            Intent::Navigate { .. } | Intent::Select { .. } => self.window,
        }
    }
}

/// An open interaction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenWindow {
    /// Latest cumulative count.
    pub count: u32,
    /// When the window closes if nothing else arrives.
    pub deadline: Instant,
    /// Intent already emitted by this window. Once set the window is holding.
    pub resolved: Option<Intent>,
}

/// State of one device's interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowState {
    /// No window open.
    #[default]
    Idle,
    /// A window is accumulating or holding.
    Open(OpenWindow),
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkOutcome {
    /// Intent emitted by this event, if any.
    pub intent: Option<Intent>,
    /// New deadline of the window.
    pub deadline: Instant,
}

/// A window that has just closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedWindow {
    /// Count the window closed on.
    pub count: u32,
    /// Intent the window emitted, or `None` if it was discarded as noise.
    pub resolved: Option<Intent>,
}

/// Blink window state machine for one device.
#[derive(Debug, Clone)]
pub struct BlinkStateMachine {
    state: WindowState,
    cursor: usize,
    option_count: usize,
    timing: WindowTiming,
}

impl BlinkStateMachine {
    /// Create an idle machine over a menu of `option_count` entries.
    #[must_use]
    pub fn new(option_count: usize, timing: WindowTiming) -> Self {
        Self {
            state: WindowState::Idle,
            cursor: 0,
            option_count: option_count.max(1),
            timing,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Current cursor position.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Feed a cumulative burst count.
    ///
    /// Opens a window from idle or updates the open one, refreshing its
    /// deadline either way. A window emits at most one intent; events that
    /// arrive while it holds after a resolution are absorbed.
    pub fn on_blink(&mut self, count: u32, now: Instant) -> BlinkOutcome {
        let already = match self.state {
            WindowState::Open(window) => window.resolved,
            WindowState::Idle => None,
        };

        let intent = if already.is_none() {
            self.resolve(count)
        } else {
            None
        };
        let resolved = already.or(intent);

        let mut timeout = self.timing.timeout_for(count);
        if let Some(resolved) = resolved {
            timeout = timeout.max(self.timing.hold_for(resolved));
        }
        let deadline = now + timeout;

        self.state = WindowState::Open(OpenWindow {
            count,
            deadline,
            resolved,
        });

        BlinkOutcome { intent, deadline }
    }

    /// Close the window if its deadline has passed.
    ///
    /// Returns `None` when idle or when `now` is still before the deadline.
    pub fn on_deadline(&mut self, now: Instant) -> Option<ClosedWindow> {
        match self.state {
            WindowState::Open(window) if now >= window.deadline => {
                self.state = WindowState::Idle;
                Some(ClosedWindow {
                    count: window.count,
                    resolved: window.resolved,
                })
            }
            _ => None,
        }
    }

    fn resolve(&mut self, count: u32) -> Option<Intent> {
        match count {
            NAVIGATE_COUNT => {
                self.cursor = (self.cursor + 1) % self.option_count;
                Some(Intent::Navigate {
                    cursor: self.cursor,
                })
            }
            SELECT_COUNT => {
                let index = self.cursor;
                self.cursor = 0;
                Some(Intent::Select { index })
            }
            EMERGENCY_COUNT => Some(Intent::Emergency),
            // 1 is a stabilizing blink; everything else is treated as a glitch
            _ => None,
        }
    }
}
