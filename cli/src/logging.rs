// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tracing subscriber setup

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `level`; `format` is
/// `text` (compact) or `json`.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        registry
            .with(fmt_layer.json())
            .try_init()
            .context("Failed to install log subscriber")?;
    } else {
        registry
            .with(fmt_layer.compact())
            .try_init()
            .context("Failed to install log subscriber")?;
    }

    Ok(())
}
