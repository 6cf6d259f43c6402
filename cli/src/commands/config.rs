// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use pmsync_core::domain::config::RemotingConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./pmsync-config.yaml)
        #[arg(short, long, default_value = "./pmsync-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(&output, examples, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = RemotingConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PMSYNC_CONFIG_PATH: {}",
            std::env::var("PMSYNC_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./pmsync-config.yaml");
        println!("  4. ~/.pmsync/config.yaml");
        println!("  5. /etc/pmsync/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Server:".bold());
    println!("  Name: {}", config.metadata.name);
    println!(
        "  Endpoint: http://{}:{}{}",
        config.spec.server.bind_address, config.spec.server.port, config.spec.server.endpoint_path
    );
    println!();

    println!("{}", "Long Poll:".bold());
    if config.spec.long_poll.enabled {
        println!("  Enabled, max hold {} ms", config.spec.long_poll.max_hold_ms);
    } else {
        println!("  {}", "Disabled".dimmed());
    }
    println!();

    println!("{}", "Observability:".bold());
    let logging = config.logging();
    println!("  Logging: {} ({})", logging.level, logging.format);
    match config.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        Some(metrics) if metrics.enabled => println!("  Metrics: Prometheus on port {}", metrics.port),
        _ => println!("  Metrics: {}", "disabled".dimmed()),
    }
    println!(
        "  Diagnostics: {}",
        if config.spec.diagnostics.enabled {
            "enabled".normal()
        } else {
            "disabled".dimmed()
        }
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = RemotingConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

/// Write a sample configuration to `output`.
pub async fn generate(output: &Path, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    if with_examples {
        std::fs::write(output, include_str!("../../templates/config-with-examples.yaml"))
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        RemotingConfigManifest::default()
            .to_yaml_file(output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!("{} {}", "✓ Generated configuration:".green(), output.display());

    Ok(())
}
