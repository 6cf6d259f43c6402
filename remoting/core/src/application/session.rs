// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Server-side sessions and their repository.
//!
//! A session scopes exactly one server model store. The hosting layer decides
//! when sessions start and end; the connector only looks them up.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::application::store_executor::StoreHandle;
use crate::domain::attribute::AttributeKey;
use crate::domain::command::Command;
use crate::domain::presentation_model::ModelId;
use crate::domain::session::SessionId;
use crate::domain::subscription::Subscription;

/// Server commands sent to the client and not yet acknowledged.
#[derive(Debug, Default)]
struct Outbox {
    sequence: u64,
    unacknowledged: Vec<Command>,
}

/// One client's server-side state.
pub struct ServerSession {
    pub id: SessionId,
    pub store: StoreHandle,
    pub created_at: DateTime<Utc>,
    diagnostics: Subscription,
    outbox: Mutex<Outbox>,
}

impl ServerSession {
    pub fn new(id: SessionId, store: StoreHandle, diagnostics: Subscription) -> Self {
        Self {
            id,
            store,
            created_at: Utc::now(),
            diagnostics,
            outbox: Mutex::new(Outbox::default()),
        }
    }

    /// Settle the outbox against an incoming client batch.
    ///
    /// Everything up to `acknowledged` reached the client and is dropped. What
    /// remains loses the commands the client's batch supersedes: value changes
    /// of attributes the client changed itself and anything touching a model
    /// the client deleted.
    pub(crate) fn acknowledge(&self, acknowledged: u64, client_commands: &[Command]) {
        let mut outbox = self.outbox.lock();
        if acknowledged >= outbox.sequence {
            outbox.unacknowledged.clear();
            return;
        }

        let mut changed = HashSet::new();
        let mut deleted = HashSet::new();
        for command in client_commands {
            match command {
                Command::ChangeAttributeValue { .. } => {
                    if let Some(key) = value_key(command) {
                        changed.insert(key);
                    }
                }
                Command::DeletePresentationModel { model_id } => {
                    deleted.insert(model_id.clone());
                }
                _ => {}
            }
        }
        if changed.is_empty() && deleted.is_empty() {
            return;
        }

        outbox.unacknowledged.retain(|command| {
            let superseded_value = value_key(command).is_some_and(|key| changed.contains(&key));
            let deleted_model = command.model_id().is_some_and(|id: &ModelId| deleted.contains(id));
            !(superseded_value || deleted_model)
        });
    }

    pub(crate) fn has_unacknowledged(&self) -> bool {
        !self.outbox.lock().unacknowledged.is_empty()
    }

    /// Queue `commands` behind the unacknowledged ones and number the
    /// response carrying all of them. Returns sequence 0 for an empty response.
    pub(crate) fn stage_response(&self, commands: Vec<Command>) -> (u64, Vec<Command>) {
        let mut outbox = self.outbox.lock();
        outbox.unacknowledged.extend(commands);
        if outbox.unacknowledged.is_empty() {
            return (0, Vec::new());
        }
        outbox.sequence += 1;
        (outbox.sequence, outbox.unacknowledged.clone())
    }

    /// Withdraw the session's diagnostics registration.
    pub(crate) fn detach_diagnostics(&self) {
        self.diagnostics.unsubscribe();
    }
}

fn value_key(command: &Command) -> Option<AttributeKey> {
    match command {
        Command::ChangeAttributeValue {
            model_id,
            attribute_name,
            tag,
            ..
        } => Some(AttributeKey::with_tag(model_id.clone(), attribute_name.clone(), *tag)),
        _ => None,
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Storage for live sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, session: Arc<ServerSession>) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Arc<ServerSession>>, RepositoryError>;

    /// Remove and return the session.
    async fn remove(&self, id: SessionId) -> Result<Option<Arc<ServerSession>>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Arc<ServerSession>>, RepositoryError>;

    async fn count(&self) -> Result<usize, RepositoryError>;
}
