//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::Config;

/// Serve command arguments.
#[derive(Debug, Default, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides `server.port`)
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ServeCommand {
    /// Apply command-line overrides to a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to config file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
