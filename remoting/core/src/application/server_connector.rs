// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Server Connector
//!
//! Serves command exchanges for many client sessions, one model store each.
//!
//! ## Exchange
//!
//! 1. The client batch is applied to the session store in one job
//!    ([`execute_batch`]); listeners run after the whole batch.
//! 2. If the batch asked for a long poll and the store has nothing to send,
//!    the request parks on the session's long-poll slot until the store gets
//!    pending changes, the poll is released, `max_hold` passes, or the server
//!    shuts down.
//! 3. The store's pending changes are flushed into the response.
//!
//! Responses carrying commands are numbered. Commands of a response the client
//! has not acknowledged yet are sent again, ahead of newer changes, with every
//! following response; a request that brings no acknowledgement is never held.
//! The client's own changes in the meantime supersede the matching commands.
//!
//! A batch consisting only of `remoting:release` completes the session's held
//! poll and answers with an empty batch without flushing, so the flushed
//! changes always travel on the held poll's response.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::actions::{execute_batch, ActionRegistry};
use crate::application::session::{RepositoryError, ServerSession, SessionRepository};
use crate::application::store_executor::{ExecutorError, StoreHandle};
use crate::domain::command::CommandBatch;
use crate::domain::config::RemotingConfigManifest;
use crate::domain::model_store::ModelStore;
use crate::domain::session::{SessionId, Side};
use crate::infrastructure::diagnostics::DiagnosticsRegistry;
use crate::infrastructure::long_poll::LongPollRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Session repository error: {0}")]
    Repository(String),
}

impl From<RepositoryError> for ServerError {
    fn from(error: RepositoryError) -> Self {
        ServerError::Repository(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub long_poll_enabled: bool,
    pub max_hold: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            long_poll_enabled: true,
            max_hold: Duration::from_secs(30),
        }
    }
}

impl From<&RemotingConfigManifest> for ServerSettings {
    fn from(config: &RemotingConfigManifest) -> Self {
        Self {
            long_poll_enabled: config.spec.long_poll.enabled,
            max_hold: config.spec.long_poll.max_hold(),
        }
    }
}

/// Populates every new session store before its first exchange.
pub type StoreInitializer = Arc<dyn Fn(&mut ModelStore) + Send + Sync>;

pub struct ServerConnector {
    sessions: Arc<dyn SessionRepository>,
    long_polls: LongPollRegistry,
    actions: Arc<ActionRegistry>,
    diagnostics: DiagnosticsRegistry,
    settings: ServerSettings,
    initializer: Option<StoreInitializer>,
    shutdown: CancellationToken,
}

impl ServerConnector {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        actions: Arc<ActionRegistry>,
        diagnostics: DiagnosticsRegistry,
        settings: ServerSettings,
    ) -> Self {
        Self {
            sessions,
            long_polls: LongPollRegistry::new(),
            actions,
            diagnostics,
            settings,
            initializer: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_initializer(mut self, initializer: impl Fn(&mut ModelStore) + Send + Sync + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn diagnostics(&self) -> &DiagnosticsRegistry {
        &self.diagnostics
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn pending_long_polls(&self) -> usize {
        self.long_polls.pending()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start a session with a fresh server store.
    pub async fn open_session(&self) -> Result<Arc<ServerSession>, ServerError> {
        if self.shutdown.is_cancelled() {
            return Err(ServerError::ShuttingDown);
        }

        let id = SessionId::new();
        let mut store = ModelStore::new(Side::Server);
        if let Some(initializer) = &self.initializer {
            initializer(&mut store);
        }
        let handle = StoreHandle::spawn(store);
        let diagnostics = self
            .diagnostics
            .register(Arc::new(handle.clone()), format!("session {}", id));

        let session = Arc::new(ServerSession::new(id, handle, diagnostics));
        self.sessions.save(session.clone()).await?;

        let active = self.sessions.count().await?;
        gauge!("pmsync_active_sessions").set(active as f64);
        info!(session_id = %id, active, "Opened remoting session");
        Ok(session)
    }

    pub async fn find_session(&self, id: SessionId) -> Result<Option<Arc<ServerSession>>, ServerError> {
        Ok(self.sessions.find_by_id(id).await?)
    }

    /// End a session, releasing its held poll. Returns false for unknown ids.
    pub async fn close_session(&self, id: SessionId) -> Result<bool, ServerError> {
        let Some(session) = self.sessions.remove(id).await? else {
            return Ok(false);
        };
        self.long_polls.forget(id);
        session.detach_diagnostics();

        let active = self.sessions.count().await?;
        gauge!("pmsync_active_sessions").set(active as f64);
        info!(session_id = %id, active, "Closed remoting session");
        Ok(true)
    }

    /// Complete the session's held long poll.
    pub fn release(&self, id: SessionId) -> bool {
        let released = self.long_polls.release(id);
        debug!(session_id = %id, released, "Release requested");
        released
    }

    /// Refuse new exchanges and release every held poll.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let released = self.long_polls.release_all();
        info!(released, "Remoting server shutting down");
    }

    /// Serve one exchange for `id`.
    pub async fn handle(&self, id: SessionId, batch: CommandBatch) -> Result<CommandBatch, ServerError> {
        if self.shutdown.is_cancelled() {
            return Err(ServerError::ShuttingDown);
        }
        let session = self
            .sessions
            .find_by_id(id)
            .await?
            .ok_or(ServerError::UnknownSession(id))?;

        if batch.is_release_only() {
            self.release(id);
            return Ok(CommandBatch::default());
        }

        session.acknowledge(batch.acknowledged, &batch.commands);

        let received = batch.len();
        let actions = self.actions.clone();
        let outcome = session
            .store
            .run(move |store| execute_batch(store, &actions, batch.commands))
            .await?;

        counter!("pmsync_commands_applied_total").increment(outcome.report.applied as u64);
        counter!("pmsync_commands_rejected_total", "kind" => "Store").increment(outcome.report.rejected.len() as u64);
        debug!(
            session_id = %id,
            received,
            applied = outcome.report.applied,
            rejected = outcome.report.rejected.len(),
            "Applied client batch"
        );
        if outcome.release {
            self.release(id);
        }

        let idle = !outcome.pending && !session.has_unacknowledged();
        let released = if outcome.long_poll && self.settings.long_poll_enabled && idle {
            self.hold(&session).await
        } else {
            false
        };

        let flushed = session.store.run(|store| store.flush_changes()).await?;
        let (sequence, commands) = session.stage_response(flushed);
        counter!("pmsync_batches_sent_total", "side" => "server").increment(1);
        Ok(CommandBatch {
            commands,
            released,
            sequence,
            acknowledged: 0,
        })
    }

    /// Park until the store has something to send. Returns true when the poll
    /// ended by release or shutdown.
    async fn hold(&self, session: &ServerSession) -> bool {
        let ticket = self.long_polls.register(session.id);
        let generation = ticket.generation();
        gauge!("pmsync_pending_long_polls").set(self.long_polls.pending() as f64);
        debug!(session_id = %session.id, "Holding long poll");

        let released = tokio::select! {
            _ = ticket.released() => true,
            ready = session.store.changes_pending() => {
                if !ready {
                    warn!(session_id = %session.id, "Session store stopped while holding long poll");
                }
                false
            }
            _ = tokio::time::sleep(self.settings.max_hold) => false,
            _ = self.shutdown.cancelled() => true,
        };

        self.long_polls.complete(session.id, generation);
        gauge!("pmsync_pending_long_polls").set(self.long_polls.pending() as f64);
        debug!(session_id = %session.id, released, "Long poll completed");
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribute::AttributeKey;
    use crate::domain::command::Command;
    use crate::domain::value::Value;
    use crate::infrastructure::session_repository::InMemorySessionRepository;
    use tokio::time::timeout;

    fn connector(settings: ServerSettings) -> Arc<ServerConnector> {
        Arc::new(ServerConnector::new(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(ActionRegistry::new()),
            DiagnosticsRegistry::new(true),
            settings,
        ))
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let server = connector(ServerSettings::default());
        let result = server.handle(SessionId::new(), CommandBatch::default()).await;
        assert!(matches!(result, Err(ServerError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_sessions_register_diagnostics() {
        let server = connector(ServerSettings::default());
        let session = server.open_session().await.unwrap();
        assert_eq!(server.diagnostics().len(), 1);

        assert!(server.close_session(session.id).await.unwrap());
        assert!(server.diagnostics().is_empty());
        assert!(!server.close_session(session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_long_poll_returns_server_push() {
        let server = connector(ServerSettings::default());
        let session = server.open_session().await.unwrap();

        let poller = server.clone();
        let id = session.id;
        let poll = tokio::spawn(async move { poller.handle(id, CommandBatch::new(vec![Command::long_poll()])).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session
            .store
            .run(|store| store.builder("News").with_id("headline").with_attribute("text", "hi").create())
            .await
            .unwrap()
            .unwrap();

        let response = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap().unwrap();
        assert!(!response.released);
        assert_eq!(response.len(), 1);
    }

    #[tokio::test]
    async fn test_release_completes_held_poll_with_released_flag() {
        let server = connector(ServerSettings::default());
        let session = server.open_session().await.unwrap();

        let poller = server.clone();
        let id = session.id;
        let poll = tokio::spawn(async move { poller.handle(id, CommandBatch::new(vec![Command::long_poll()])).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let ack = server.handle(id, CommandBatch::new(vec![Command::release()])).await.unwrap();
        assert!(ack.is_empty());

        let response = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap().unwrap();
        assert!(response.released);
        assert!(response.is_empty());
        assert_eq!(server.pending_long_polls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_held_polls() {
        let server = connector(ServerSettings::default());
        let session = server.open_session().await.unwrap();

        let poller = server.clone();
        let id = session.id;
        let poll = tokio::spawn(async move { poller.handle(id, CommandBatch::new(vec![Command::long_poll()])).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let response = timeout(Duration::from_secs(1), poll).await.unwrap().unwrap().unwrap();
        assert!(response.released);
        assert!(matches!(server.open_session().await, Err(ServerError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_max_hold_bounds_the_poll() {
        let server = connector(ServerSettings {
            long_poll_enabled: true,
            max_hold: Duration::from_millis(20),
        });
        let session = server.open_session().await.unwrap();

        let response = timeout(
            Duration::from_secs(1),
            server.handle(session.id, CommandBatch::new(vec![Command::long_poll()])),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!response.released);
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_unacknowledged_response_is_repeated_without_holding() {
        let server = connector(ServerSettings::default());
        let session = server.open_session().await.unwrap();
        session
            .store
            .run(|store| store.builder("News").with_id("headline").with_attribute("text", "hi").create())
            .await
            .unwrap()
            .unwrap();

        let first = server.handle(session.id, CommandBatch::default()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.sequence, 1);

        let repeated = timeout(
            Duration::from_secs(1),
            server.handle(session.id, CommandBatch::new(vec![Command::long_poll()])),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(repeated.commands, first.commands);
        assert_eq!(repeated.sequence, 2);

        let settled = server
            .handle(
                session.id,
                CommandBatch {
                    acknowledged: repeated.sequence,
                    ..CommandBatch::default()
                },
            )
            .await
            .unwrap();
        assert!(settled.is_empty());
        assert_eq!(settled.sequence, 0);
    }

    #[tokio::test]
    async fn test_initializer_models_are_sent_on_first_exchange() {
        let server = Arc::new(
            ServerConnector::new(
                Arc::new(InMemorySessionRepository::new()),
                Arc::new(ActionRegistry::new()),
                DiagnosticsRegistry::new(false),
                ServerSettings::default(),
            )
            .with_initializer(|store| {
                let _ = store.builder("Greeting").with_id("greeting").with_attribute("text", "hello").create();
            }),
        );
        let session = server.open_session().await.unwrap();

        let response = server
            .handle(session.id, CommandBatch::new(vec![Command::long_poll()]))
            .await
            .unwrap();
        assert_eq!(response.len(), 1);

        let text = session
            .store
            .run(|store| store.get(&AttributeKey::new("greeting", "text")).cloned())
            .await
            .unwrap();
        assert_eq!(text, Some(Value::from("hello")));
    }
}
