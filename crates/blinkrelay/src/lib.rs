//! `blinkrelay` - A relay for blink-based assistive communication
//!
//! This library tracks the presence of wearable blink-detection devices,
//! turns their blink bursts into menu intents, and forwards selections and
//! emergencies to a downstream automation webhook, while streaming live
//! state to dashboards over WebSocket and SSE.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod interpreter;
pub mod liveness;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use dispatch::{DisabledDispatcher, IntentDispatcher, WebhookDispatcher};
pub use error::{Error, Result};
pub use gateway::{Notification, PresenceGateway, Subscription};
pub use interpreter::{BlinkInterpreter, Intent, InterpretedIntent, MenuOption, OptionKind};
pub use liveness::LivenessMonitor;
pub use logging::init_logging;
pub use registry::{DeviceRecord, DeviceStatus, Registry, Telemetry};
pub use relay::Relay;
pub use shutdown::ShutdownHandle;
