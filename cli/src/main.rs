// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # pmsync
//!
//! Hosts the presentation-model remoting endpoint.
//!
//! ## Commands
//!
//! - `pmsync serve [--host] [--port]` - Run the remoting server
//! - `pmsync config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pmsync_cli::commands::{self, ConfigCommand, ServeArgs};

/// pmsync - presentation-model remoting server
#[derive(Parser)]
#[command(name = "pmsync")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PMSYNC_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "PMSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the remoting server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::serve::execute(args, cli.config, cli.log_level).await,
        Commands::Config { command } => {
            pmsync_cli::logging::init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
    }
}
