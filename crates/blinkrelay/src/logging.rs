//! Logging configuration for blinkrelay.
//!
//! `-v`/`-q` pick a [`Verbosity`]; `RUST_LOG` overrides it. HTTP request spans
//! come from `tower_http`, so that target follows the same level.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How chatty the relay is on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Normal output level (info and above).
    #[default]
    Normal,
    /// Verbose output (debug and above).
    Verbose,
    /// Very verbose output (trace level).
    Trace,
}

impl Verbosity {
    /// Most verbose level that is still printed.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Default filter directive for `verbosity`.
///
/// Covers this crate and the `tower_http` request spans at the same level.
#[must_use]
pub fn default_directive(verbosity: Verbosity) -> String {
    let level = verbosity.to_level_filter().as_str().to_ascii_lowercase();
    format!("blinkrelay={level},tower_http={level}")
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG` takes precedence over `verbosity`.
///
/// # Examples
///
/// ```no_run
/// use blinkrelay::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed
    let _ = subscriber.try_init();
}

/// Route warnings from the relay's background tasks to the test writer.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("blinkrelay=warn")
        .with_test_writer()
        .try_init();
}
