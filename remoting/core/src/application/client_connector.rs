// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Client Connector
//!
//! Drives synchronization of one client store with its server.
//!
//! ```text
//!            local change              flush + send
//!   Idle ───────────────▶ Pending ───────────────▶ AwaitingResponse
//!    ▲                                                   │
//!    └──────────── response applied / failure requeued ──┘
//! ```
//!
//! With long polling enabled and nothing to send, the connector parks a
//! `remoting:longPoll` exchange on the server. A local change while the poll is
//! outstanding sends `remoting:release` so the poll returns and the change goes
//! out on the next exchange.
//!
//! Every request acknowledges the last numbered server response the client
//! applied, so the server sends a lost response again. When the server reports
//! the session as expired the client drops its models and pending changes and
//! reloads from the new session on the next exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::store_executor::{ExecutorError, StoreHandle};
use crate::domain::attribute::Tag;
use crate::domain::command::{Command, CommandBatch, PARAMETER_MODEL_TYPE};
use crate::domain::model_store::{ApplyReport, StoreError};
use crate::domain::transport::{Transport, TransportError};
use crate::domain::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SyncState {
    Idle,
    PendingLocalChanges,
    AwaitingResponse,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub long_poll: bool,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            long_poll: true,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Result of one completed exchange.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Commands sent, control actions excluded.
    pub sent: usize,
    pub received: usize,
    pub report: ApplyReport,
    pub released: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Client connector has been stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Action could not be delivered: {0}")]
    Sync(#[from] SyncError),

    #[error("Connector stopped before action '{0}' was acknowledged")]
    Stopped(String),

    #[error("Action '{0}' was dropped with the expired server session")]
    Dropped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    /// Only when local changes are pending.
    Push,
    Pull,
    LongPoll,
}

pub struct ClientConnector {
    store: StoreHandle,
    transport: Arc<dyn Transport>,
    settings: SyncSettings,
    state: watch::Sender<SyncState>,
    exchange_lock: tokio::sync::Mutex<()>,
    polling: AtomicBool,
    tickets: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_ticket: AtomicU64,
    /// Sequence of the last server response applied.
    acknowledged: AtomicU64,
    shutdown: CancellationToken,
}

impl ClientConnector {
    pub fn new(store: StoreHandle, transport: Arc<dyn Transport>, settings: SyncSettings) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            store,
            transport,
            settings,
            state,
            exchange_lock: tokio::sync::Mutex::new(()),
            polling: AtomicBool::new(false),
            tickets: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            acknowledged: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn state(&self) -> SyncState {
        let state = *self.state.borrow();
        if state == SyncState::Idle && self.store.has_pending_changes() {
            SyncState::PendingLocalChanges
        } else {
            state
        }
    }

    /// Receiver following the exchange state. `PendingLocalChanges` is only
    /// reported by [`Self::state`].
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Send pending local changes and apply the server's answer.
    ///
    /// An outstanding long poll is released first so the exchange is not
    /// queued behind it.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        if self.polling.load(Ordering::Acquire) {
            self.release_poll().await;
        }
        self.exchange(Exchange::Push).await
    }

    /// Exchange even when nothing is pending, picking up server changes
    /// without waiting for them.
    pub async fn pull(&self) -> Result<SyncOutcome, SyncError> {
        if self.polling.load(Ordering::Acquire) {
            self.release_poll().await;
        }
        self.exchange(Exchange::Pull).await
    }

    /// Exchange with a long poll, returning once the server has something to
    /// send, the poll was released, or the server's hold timed out.
    pub async fn long_poll(&self) -> Result<SyncOutcome, SyncError> {
        self.exchange(Exchange::LongPoll).await
    }

    async fn exchange(&self, mode: Exchange) -> Result<SyncOutcome, SyncError> {
        let long_poll = mode == Exchange::LongPoll;
        let _guard = self.exchange_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Stopped);
        }

        let commands = self.store.run(|store| store.flush_changes()).await?;
        if commands.is_empty() && mode == Exchange::Push {
            return Ok(SyncOutcome::default());
        }

        let tickets: Vec<u64> = commands
            .iter()
            .filter_map(|command| match command {
                Command::Action { ticket, .. } => *ticket,
                _ => None,
            })
            .collect();
        let sent = commands.len();

        let mut batch = CommandBatch::new(commands.clone());
        batch.acknowledged = self.acknowledged.load(Ordering::Acquire);
        if long_poll {
            batch.commands.push(Command::long_poll());
        }

        self.state.send_replace(SyncState::AwaitingResponse);
        self.polling.store(long_poll, Ordering::Release);
        counter!("pmsync_batches_sent_total", "side" => "client").increment(1);
        debug!(sent, long_poll, "Sending command batch");

        let result = self.transport.exchange(batch).await;
        self.polling.store(false, Ordering::Release);

        match result {
            Ok(response) => {
                let received = response.len();
                let released = response.released;
                let sequence = response.sequence;
                let report = self.store.run(move |store| store.apply_remote(response.commands)).await?;
                if sequence > 0 {
                    self.acknowledged.store(sequence, Ordering::Release);
                }
                self.complete_tickets(&tickets);
                self.settle();
                debug!(sent, received, released, "Exchange completed");
                Ok(SyncOutcome {
                    sent,
                    received,
                    report,
                    released,
                })
            }
            Err(TransportError::SessionExpired) => {
                counter!("pmsync_transport_failures_total").increment(1);
                self.discard_session_state().await?;
                self.settle();
                Err(TransportError::SessionExpired.into())
            }
            Err(error) => {
                counter!("pmsync_transport_failures_total").increment(1);
                warn!(error = %error, requeued = sent, "Exchange failed, changes requeued");
                self.store.run(move |store| store.requeue(commands)).await?;
                self.settle();
                Err(error.into())
            }
        }
    }

    /// Synchronize until [`Self::shutdown`], backing off on transport failures.
    pub async fn run(self: Arc<Self>) {
        info!(long_poll = self.settings.long_poll, "Client connector started");
        let mut delay = self.settings.retry_delay;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let result = if self.store.has_pending_changes() {
                self.exchange(Exchange::Push).await.map(|_| ())
            } else if self.settings.long_poll {
                match self.poll_until_local_change().await {
                    // Empty and not released: the server answered without holding.
                    Ok(outcome) if outcome.received == 0 && !outcome.released => {
                        if !self.pause(self.settings.retry_delay).await {
                            break;
                        }
                        Ok(())
                    }
                    other => other.map(|_| ()),
                }
            } else {
                tokio::select! {
                    ready = self.store.changes_pending() => {
                        if !ready {
                            break;
                        }
                        continue;
                    }
                    _ = self.shutdown.cancelled() => break,
                }
            };

            match result {
                Ok(()) => delay = self.settings.retry_delay,
                Err(SyncError::Transport(error)) => {
                    debug!(error = %error, delay_ms = delay.as_millis() as u64, "Retrying after transport failure");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                    delay = (delay * 2).min(self.settings.max_retry_delay);
                }
                Err(error) => {
                    warn!(error = %error, "Client connector stopping");
                    break;
                }
            }
        }

        self.state.send_replace(SyncState::Stopped);
        info!("Client connector stopped");
    }

    async fn poll_until_local_change(&self) -> Result<SyncOutcome, SyncError> {
        let poll = self.long_poll();
        tokio::pin!(poll);
        let mut released = false;

        loop {
            tokio::select! {
                outcome = &mut poll => return outcome,
                ready = self.store.changes_pending(), if !released => {
                    released = true;
                    if ready {
                        self.release_poll().await;
                    }
                }
            }
        }
    }

    /// Wait up to `delay` for a local change. Returns false on shutdown or
    /// when the store stopped.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            ready = self.store.changes_pending() => ready,
            _ = self.shutdown.cancelled() => false,
        }
    }

    async fn discard_session_state(&self) -> Result<(), SyncError> {
        self.acknowledged.store(0, Ordering::Release);
        let actions = {
            let mut tickets = self.tickets.lock();
            let count = tickets.len();
            tickets.clear();
            count
        };
        let models = self.store.run(|store| store.discard_all()).await?;
        warn!(models, actions, "Server session expired, local models discarded");
        Ok(())
    }

    async fn release_poll(&self) {
        debug!("Releasing outstanding long poll");
        if let Err(error) = self.transport.release().await {
            warn!(error = %error, "Failed to release long poll");
        }
    }

    /// Run the server action `name` with `params` and wait until the server
    /// acknowledged it.
    ///
    /// Parameters travel as a transient parameter model in the same batch.
    /// When the exchange fails the action stays queued and is sent with the
    /// next synchronization; the error is returned to the caller.
    pub async fn invoke(&self, name: &str, params: Vec<(String, Value)>) -> Result<(), InvokeError> {
        if self.shutdown.is_cancelled() {
            return Err(InvokeError::Stopped(name.to_string()));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (acknowledged, ack) = oneshot::channel();
        self.tickets.lock().insert(ticket, acknowledged);

        let action = name.to_string();
        let queued = self
            .store
            .run(move |store| {
                if !params.is_empty() {
                    let mut builder = store.builder(PARAMETER_MODEL_TYPE);
                    for (param, value) in params {
                        let type_id = Value::Integer(i32::from(value.value_type().id()));
                        builder = builder
                            .with_attribute(param.clone(), value)
                            .with_tagged_attribute(param, Tag::ValueType, type_id);
                    }
                    builder.create()?;
                }
                store.record_action(&action, Some(ticket));
                Ok::<_, StoreError>(())
            })
            .await;

        match queued {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                self.tickets.lock().remove(&ticket);
                return Err(error.into());
            }
            Err(error) => {
                self.tickets.lock().remove(&ticket);
                return Err(error.into());
            }
        }
        debug!(action = name, ticket, "Action queued");

        self.synchronize().await?;
        ack.await.map_err(|_| {
            if self.shutdown.is_cancelled() {
                InvokeError::Stopped(name.to_string())
            } else {
                InvokeError::Dropped(name.to_string())
            }
        })
    }

    /// Stop synchronizing. Outstanding polls are released and pending
    /// invocations fail with [`InvokeError::Stopped`].
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        if self.polling.load(Ordering::Acquire) {
            self.release_poll().await;
        }
        self.tickets.lock().clear();
        self.state.send_replace(SyncState::Stopped);
        info!("Client connector shut down");
    }

    fn complete_tickets(&self, tickets: &[u64]) {
        if tickets.is_empty() {
            return;
        }
        let mut pending = self.tickets.lock();
        for ticket in tickets {
            if let Some(acknowledged) = pending.remove(ticket) {
                let _ = acknowledged.send(());
            }
        }
    }

    fn settle(&self) {
        let state = if self.shutdown.is_cancelled() {
            SyncState::Stopped
        } else {
            SyncState::Idle
        };
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::actions::ActionRegistry;
    use crate::application::server_connector::{ServerConnector, ServerSettings};
    use crate::domain::attribute::AttributeKey;
    use crate::domain::model_store::ModelStore;
    use crate::domain::session::Side;
    use crate::infrastructure::diagnostics::DiagnosticsRegistry;
    use crate::infrastructure::local_transport::LocalTransport;
    use crate::infrastructure::session_repository::InMemorySessionRepository;
    use tokio::time::timeout;

    async fn setup(settings: SyncSettings) -> (Arc<ServerConnector>, Arc<LocalTransport>, Arc<ClientConnector>) {
        setup_with_server(ServerSettings::default(), settings).await
    }

    async fn setup_with_server(
        server_settings: ServerSettings,
        settings: SyncSettings,
    ) -> (Arc<ServerConnector>, Arc<LocalTransport>, Arc<ClientConnector>) {
        let server = Arc::new(ServerConnector::new(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(ActionRegistry::new()),
            DiagnosticsRegistry::new(false),
            server_settings,
        ));
        let transport = Arc::new(LocalTransport::connect(server.clone()).await.unwrap());
        let client = Arc::new(ClientConnector::new(
            StoreHandle::spawn(ModelStore::new(Side::Client)),
            transport.clone(),
            settings,
        ));
        (server, transport, client)
    }

    #[tokio::test]
    async fn test_synchronize_without_changes_sends_nothing() {
        let (_server, _transport, client) = setup(SyncSettings::default()).await;
        let outcome = client.synchronize().await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(client.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_state_reports_pending_local_changes() {
        let (_server, _transport, client) = setup(SyncSettings::default()).await;
        client
            .store()
            .run(|store| store.builder("Person").with_attribute("name", "Ada").create())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), SyncState::PendingLocalChanges);

        let outcome = client.synchronize().await.unwrap();
        assert_eq!(outcome.sent, 1);
        assert_eq!(client.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_failed_exchange_requeues_changes() {
        let (_server, transport, client) = setup(SyncSettings::default()).await;
        let id = client
            .store()
            .run(|store| store.builder("Person").with_attribute("name", "Ada").create())
            .await
            .unwrap()
            .unwrap();

        transport.fail_next_requests(1);
        let result = client.synchronize().await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
        assert_eq!(client.state(), SyncState::PendingLocalChanges);

        let outcome = client.synchronize().await.unwrap();
        assert_eq!(outcome.sent, 1);

        let session = transport.session().await.unwrap();
        let name = session
            .store
            .run(move |store| store.get(&AttributeKey::new(id, "name")).cloned())
            .await
            .unwrap();
        assert_eq!(name, Some(Value::from("Ada")));
    }

    #[tokio::test]
    async fn test_run_loop_releases_poll_on_local_change() {
        let settings = SyncSettings {
            long_poll: true,
            ..SyncSettings::default()
        };
        let (server, transport, client) = setup(settings).await;
        let runner = tokio::spawn(client.clone().run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(server.pending_long_polls(), 1);

        let id = client
            .store()
            .run(|store| store.builder("Person").with_attribute("name", "Ada").create())
            .await
            .unwrap()
            .unwrap();

        let session = transport.session().await.unwrap();
        let key = AttributeKey::new(id, "name");
        timeout(Duration::from_secs(2), async {
            loop {
                let key = key.clone();
                let value = session.store.run(move |store| store.get(&key).cloned()).await.unwrap();
                if value.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        client.shutdown().await;
        timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
        assert_eq!(client.state(), SyncState::Stopped);
    }

    #[tokio::test]
    async fn test_run_loop_paces_polls_when_server_does_not_hold() {
        let server_settings = ServerSettings {
            long_poll_enabled: false,
            ..ServerSettings::default()
        };
        let settings = SyncSettings {
            retry_delay: Duration::from_millis(50),
            ..SyncSettings::default()
        };
        let (_server, transport, client) = setup_with_server(server_settings, settings).await;
        let session = transport.session().await.unwrap();

        let runner = tokio::spawn(client.clone().run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = session.store.stats().jobs_executed;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let idle_jobs = session.store.stats().jobs_executed - before;

        // Two jobs per exchange, about one exchange per retry delay.
        assert!(idle_jobs <= 20, "server store ran {} jobs while idle", idle_jobs);

        client.shutdown().await;
        timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_expired_session_discards_local_state_and_reloads() {
        let (server, transport, client) = setup(SyncSettings::default()).await;
        let first = transport.session_id();
        client
            .store()
            .run(|store| store.builder("Person").with_attribute("name", "Ada").create())
            .await
            .unwrap()
            .unwrap();
        client.synchronize().await.unwrap();

        assert!(server.close_session(first).await.unwrap());
        client
            .store()
            .run(|store| {
                let id = store.models().next().map(|model| model.id().clone()).unwrap();
                store.set(&AttributeKey::new(id, "name"), "Grace")
            })
            .await
            .unwrap()
            .unwrap();

        let result = client.synchronize().await;
        assert!(matches!(result, Err(SyncError::Transport(TransportError::SessionExpired))));
        assert!(client.store().run(|store| store.is_empty()).await.unwrap());
        assert_eq!(client.state(), SyncState::Idle);

        client.pull().await.unwrap();
        assert_ne!(transport.session_id(), first);
        assert!(server.find_session(transport.session_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invoke_after_shutdown_fails() {
        let (_server, _transport, client) = setup(SyncSettings::default()).await;
        client.shutdown().await;
        let result = client.invoke("anything", Vec::new()).await;
        assert!(matches!(result, Err(InvokeError::Stopped(_))));
    }
}
