// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `pmsync serve`

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use pmsync_core::domain::config::RemotingConfigManifest;

use crate::logging::init_logging;
use crate::server;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// HTTP bind address (default: from configuration)
    #[arg(long, env = "PMSYNC_HOST")]
    pub host: Option<String>,

    /// HTTP port (default: from configuration)
    #[arg(long, env = "PMSYNC_PORT")]
    pub port: Option<u16>,
}

/// Effective configuration: file (or defaults), then environment, then flags.
pub fn resolve_config(args: &ServeArgs, config_path: Option<PathBuf>) -> Result<RemotingConfigManifest> {
    let mut config = RemotingConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    if let Some(host) = &args.host {
        config.spec.server.bind_address = host.clone();
    }
    if let Some(port) = args.port {
        config.spec.server.port = port;
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>, log_level: Option<String>) -> Result<()> {
    let config = resolve_config(&args, config_path)?;

    let logging = config.logging();
    init_logging(log_level.as_deref().unwrap_or(&logging.level), &logging.format)?;
    info!("Configuration loaded: {}", config.metadata.name);

    server::run(config).await
}
