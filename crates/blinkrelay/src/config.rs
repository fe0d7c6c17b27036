//! Configuration management for blinkrelay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interpreter::{MenuOption, OptionKind};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default config directory name.
const CONFIG_DIR_NAME: &str = "blinkrelay";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. The `PORT` environment variable (overrides `server.port`)
/// 2. Environment variables prefixed with `BLINKRELAY_`, nested with `__`
///    (e.g. `BLINKRELAY_LIVENESS__HEARTBEAT_TIMEOUT_SECS=20`)
/// 3. TOML config file at `~/.config/blinkrelay/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Device liveness configuration.
    pub liveness: LivenessConfig,
    /// Blink interpretation configuration.
    pub interpreter: InterpreterConfig,
    /// Subscriber fan-out configuration.
    pub gateway: GatewayConfig,
    /// Downstream webhook configuration.
    pub dispatch: DispatchConfig,
    /// Profile context attached to dispatched intents.
    pub profile: ProfileConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

/// Device liveness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// A device with no heartbeat for longer than this goes offline.
    pub heartbeat_timeout_secs: u64,
    /// How often to look for timed-out devices.
    pub sweep_interval_secs: u64,
    /// How often to re-announce every device's status.
    pub announce_interval_secs: u64,
}

/// Blink interpretation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Window length (and hold) for counts below the emergency gesture.
    pub window_ms: u64,
    /// Window length (and hold) once the count reaches the emergency gesture.
    pub emergency_window_ms: u64,
    /// Capacity of the queue between the gateway and the interpreter.
    pub blink_queue: usize,
    /// Ordered options the cursor moves through.
    pub menu: Vec<MenuOption>,
}

/// Subscriber fan-out configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Capacity of each subscriber's outbound queue.
    pub subscriber_queue: usize,
    /// Interval between SSE keep-alive comments.
    pub sse_keepalive_secs: u64,
}

/// Downstream webhook configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Webhook that receives intent payloads. Dispatch is disabled if unset.
    pub webhook_url: Option<String>,
    /// Request timeout for webhook calls.
    pub timeout_secs: u64,
}

/// Profile and medical context sent with dispatched intents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Display name of the user.
    pub name: String,
    /// Hospital patient identifier.
    pub patient_id: String,
    /// Name of the user's hospital.
    pub hospital_name: String,
    /// Address of the user's hospital.
    pub hospital_address: String,
    /// Phone number of the user's hospital.
    pub hospital_phone: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 15,
            sweep_interval_secs: 5,
            announce_interval_secs: 10,
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            window_ms: 2_000,
            emergency_window_ms: 3_000,
            blink_queue: 1_024,
            menu: default_menu(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: 256,
            sse_keepalive_secs: 30,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// The basic-needs menu of the dashboard.
fn default_menu() -> Vec<MenuOption> {
    vec![
        MenuOption::new("Food", OptionKind::Need),
        MenuOption::new("Water", OptionKind::Need),
        MenuOption::new("Toilet", OptionKind::Need),
        MenuOption::new("Help", OptionKind::Alert),
    ]
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("BLINKRELAY_").split("__"))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::ConfigValidation { message });

        if self.liveness.heartbeat_timeout_secs == 0 {
            return invalid("heartbeat_timeout_secs must be greater than 0".to_string());
        }
        if self.liveness.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be greater than 0".to_string());
        }
        if self.liveness.announce_interval_secs == 0 {
            return invalid("announce_interval_secs must be greater than 0".to_string());
        }

        if self.interpreter.window_ms == 0 {
            return invalid("window_ms must be greater than 0".to_string());
        }
        if self.interpreter.emergency_window_ms < self.interpreter.window_ms {
            return invalid(format!(
                "emergency_window_ms ({}) cannot be shorter than window_ms ({})",
                self.interpreter.emergency_window_ms, self.interpreter.window_ms
            ));
        }
        if self.interpreter.menu.is_empty() {
            return invalid("interpreter menu must contain at least one option".to_string());
        }
        if let Some(pos) = self
            .interpreter
            .menu
            .iter()
            .position(|option| option.label.trim().is_empty())
        {
            return invalid(format!("menu option {pos} has an empty label"));
        }

        if self.interpreter.blink_queue == 0 {
            return invalid("blink_queue must be greater than 0".to_string());
        }
        if self.gateway.subscriber_queue == 0 {
            return invalid("subscriber_queue must be greater than 0".to_string());
        }
        if self.gateway.sse_keepalive_secs == 0 {
            return invalid("sse_keepalive_secs must be greater than 0".to_string());
        }
        if self.dispatch.timeout_secs == 0 {
            return invalid("dispatch timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Get the heartbeat timeout as a wall-clock duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.liveness.heartbeat_timeout_secs).unwrap_or(i64::MAX / 1_000),
        )
    }

    /// Get the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.sweep_interval_secs)
    }

    /// Get the announce interval as a Duration.
    #[must_use]
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.announce_interval_secs)
    }

    /// Get the regular window length as a Duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.interpreter.window_ms)
    }

    /// Get the emergency window length as a Duration.
    #[must_use]
    pub fn emergency_window(&self) -> Duration {
        Duration::from_millis(self.interpreter.emergency_window_ms)
    }

    /// Get the SSE keep-alive interval as a Duration.
    #[must_use]
    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.gateway.sse_keepalive_secs)
    }

    /// Get the webhook request timeout as a Duration.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.timeout_secs)
    }
}
