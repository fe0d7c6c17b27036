//! Command-line interface for blinkrelay.
//!
//! This module provides the CLI structure for the `blinkrelay` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ServeCommand};

/// blinkrelay - Relay blink signals from wearable devices
///
/// Tracks device presence, interprets blink bursts into menu actions, and
/// forwards selections and emergencies to an automation webhook.
#[derive(Debug, Parser)]
#[command(name = "blinkrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay until interrupted
    Serve(ServeCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
