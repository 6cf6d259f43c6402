// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pmsync_core::application::{
    ClientConnector, InvokeError, Property, StoreHandle, SyncError, SyncOutcome, SyncSettings, SyncState,
};
use pmsync_core::{AttributeKey, Convertible, ModelStore, Side, Value};

use crate::config::ClientConfiguration;
use crate::transport::HttpTransport;

/// Builds connected [`ClientContext`]s.
pub struct ClientContextFactory;

impl ClientContextFactory {
    /// Open a session, load the server's initial models and start background
    /// synchronization.
    pub async fn connect(config: ClientConfiguration) -> Result<ClientContext> {
        config.validate().context("Invalid client configuration")?;

        let transport = Arc::new(HttpTransport::new(&config).context("Failed to build HTTP transport")?);
        let store = StoreHandle::spawn(ModelStore::new(Side::Client));
        let settings = SyncSettings {
            long_poll: config.long_poll,
            retry_delay: config.retry_delay(),
            ..SyncSettings::default()
        };
        let connector = Arc::new(ClientConnector::new(store, transport.clone(), settings));

        let outcome = connector
            .pull()
            .await
            .with_context(|| format!("Failed to connect to {}", config.server_endpoint))?;
        info!(
            endpoint = %config.server_endpoint,
            session_id = transport.session_id().as_deref().unwrap_or("-"),
            models = outcome.received,
            "Connected to pmsync server"
        );

        let runner = tokio::spawn(connector.clone().run());
        Ok(ClientContext {
            connector,
            transport,
            runner: Some(runner),
        })
    }
}

/// A connected client: its model store and the background synchronizer.
pub struct ClientContext {
    connector: Arc<ClientConnector>,
    transport: Arc<HttpTransport>,
    runner: Option<JoinHandle<()>>,
}

impl ClientContext {
    pub fn store(&self) -> &StoreHandle {
        self.connector.store()
    }

    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    pub fn state(&self) -> SyncState {
        self.connector.state()
    }

    /// Typed accessor for one attribute.
    pub fn property<T: Convertible>(&self, key: AttributeKey) -> Property<T> {
        Property::new(self.store().clone(), key)
    }

    /// Push pending changes now instead of waiting for the background loop.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        self.connector.synchronize().await
    }

    pub async fn invoke(&self, action: &str, params: Vec<(String, Value)>) -> Result<(), InvokeError> {
        self.connector.invoke(action, params).await
    }

    /// Flush pending changes, stop synchronizing and end the server session.
    pub async fn disconnect(mut self) -> Result<()> {
        if let Err(error) = self.connector.synchronize().await {
            warn!(error = %error, "Final synchronization failed");
        }
        self.connector.shutdown().await;
        if let Some(runner) = self.runner.take() {
            runner.await.context("Synchronization task panicked")?;
        }
        self.transport.close().await.context("Failed to close session")?;
        info!("Disconnected from pmsync server");
        Ok(())
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            runner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_reports_unreachable_server() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/remoting").with_status(500).create_async().await;

        let config = ClientConfiguration::new(format!("{}/remoting", server.url())).unwrap();
        let result = ClientContextFactory::connect(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_loads_initial_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/remoting")
            .with_status(200)
            .with_header("x-remoting-session", "6f1c2c9e-5b55-4c67-a0c2-3c1b1f0a9d11")
            .with_body(
                r#"{"commands":[{"kind":"CreatePresentationModel","modelId":"settings","modelType":"Settings",
                    "attributes":[{"name":"theme","value":{"type":5,"value":"dark"},"valueType":5}]}]}"#,
            )
            .create_async()
            .await;

        let config = ClientConfiguration::new(format!("{}/remoting", server.url()))
            .unwrap()
            .with_long_poll(false);
        let context = ClientContextFactory::connect(config).await.unwrap();

        let theme: Property<String> = context.property(AttributeKey::new("settings", "theme"));
        assert_eq!(theme.get().await.unwrap().as_deref(), Some("dark"));
        assert_eq!(context.state(), SyncState::Idle);
    }
}
