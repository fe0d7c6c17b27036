//! `blinkrelay` - CLI for the blink-signal relay
//!
//! This binary runs the relay server and inspects its configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use blinkrelay::cli::{Cli, Command, ConfigCommand, ServeCommand};
use blinkrelay::{init_logging, Config, Relay, ShutdownHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Serve(serve_cmd) => {
            let config = Config::load_from(cli.config).context("failed to load configuration")?;
            handle_serve(config, &serve_cmd).await
        }
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

async fn handle_serve(mut config: Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    cmd.apply(&mut config);
    config.validate()?;

    let relay = Relay::new(config)?;
    let shutdown = ShutdownHandle::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                trigger.stop();
            }
            Err(err) => warn!("Unable to listen for ctrl-c: {err}"),
        }
    });

    relay.serve(shutdown).await?;
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path).context("failed to load configuration")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Server]");
    println!("  Listen address:     {}", config.bind_address());
    if config.server.allowed_origins.is_empty() {
        println!("  Allowed origins:    any");
    } else {
        println!("  Allowed origins:    {}", config.server.allowed_origins.join(", "));
    }
    println!();
    println!("[Liveness]");
    println!("  Heartbeat timeout:  {}s", config.liveness.heartbeat_timeout_secs);
    println!("  Sweep interval:     {}s", config.liveness.sweep_interval_secs);
    println!("  Announce interval:  {}s", config.liveness.announce_interval_secs);
    println!();
    println!("[Interpreter]");
    println!("  Window:             {}ms", config.interpreter.window_ms);
    println!("  Emergency window:   {}ms", config.interpreter.emergency_window_ms);
    let labels: Vec<&str> = config
        .interpreter
        .menu
        .iter()
        .map(|option| option.label.as_str())
        .collect();
    println!("  Menu:               {}", labels.join(", "));
    println!();
    println!("[Dispatch]");
    println!(
        "  Webhook:            {}",
        config.dispatch.webhook_url.as_deref().unwrap_or("(disabled)")
    );
    println!("  Timeout:            {}s", config.dispatch.timeout_secs);
}
