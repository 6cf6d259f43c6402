// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory session storage. Sessions live as long as the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::session::{RepositoryError, ServerSession, SessionRepository};
use crate::domain::session::SessionId;

#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<ServerSession>>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: Arc<ServerSession>) -> Result<(), RepositoryError> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Arc<ServerSession>>, RepositoryError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn remove(&self, id: SessionId) -> Result<Option<Arc<ServerSession>>, RepositoryError> {
        Ok(self.sessions.write().await.remove(&id))
    }

    async fn list_all(&self) -> Result<Vec<Arc<ServerSession>>, RepositoryError> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.sessions.read().await.len())
    }
}
