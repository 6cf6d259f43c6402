// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remoting server wiring: connector, router, exporter and graceful shutdown.

use anyhow::{Context, Result};
use axum::Router;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use pmsync_core::application::{ActionRegistry, ServerConnector, ServerSettings};
use pmsync_core::domain::config::{MetricsConfig, RemotingConfigManifest};
use pmsync_core::infrastructure::{DiagnosticsRegistry, InMemorySessionRepository};
use pmsync_core::presentation::api;

/// Connector for `config`, with the actions the host provides.
pub fn build_connector(config: &RemotingConfigManifest, actions: ActionRegistry) -> Arc<ServerConnector> {
    Arc::new(ServerConnector::new(
        Arc::new(InMemorySessionRepository::new()),
        Arc::new(actions),
        DiagnosticsRegistry::new(config.spec.diagnostics.enabled),
        ServerSettings::from(config),
    ))
}

pub fn build_router(config: &RemotingConfigManifest, connector: Arc<ServerConnector>) -> Router {
    api::app(connector, &config.spec.server.endpoint_path)
}

pub fn install_metrics(config: &MetricsConfig) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!("pmsync_batches_sent_total", "Command batches sent, by side");
    describe_counter!("pmsync_transport_failures_total", "Client exchanges that failed in transport");
    describe_counter!("pmsync_commands_applied_total", "Client commands that changed a server store");
    describe_counter!("pmsync_commands_rejected_total", "Client commands or actions that were dropped");
    describe_gauge!("pmsync_active_sessions", "Open remoting sessions");
    describe_gauge!("pmsync_pending_long_polls", "Long polls currently held");

    info!("Prometheus exporter listening on 0.0.0.0:{}", config.port);
    Ok(())
}

/// Serve until Ctrl+C or SIGTERM. Held long polls are released before the
/// listener drains.
pub async fn run(config: RemotingConfigManifest) -> Result<()> {
    if let Some(metrics) = config.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        if metrics.enabled {
            install_metrics(metrics)?;
        }
    }

    let connector = build_connector(&config, ActionRegistry::new());
    let app = build_router(&config, connector.clone());

    let addr = format!("{}:{}", config.spec.server.bind_address, config.spec.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        endpoint = %config.spec.server.endpoint_path,
        long_poll = config.spec.long_poll.enabled,
        "pmsync server listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(connector))
        .await
        .context("HTTP server failed")?;

    info!("pmsync server stopped");
    Ok(())
}

async fn shutdown_signal(connector: Arc<ServerConnector>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    connector.shutdown();
}
