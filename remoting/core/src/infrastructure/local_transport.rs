// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process transport to a [`ServerConnector`].
//!
//! Every batch is encoded and decoded with the JSON codec in both directions,
//! so local round trips see exactly what an HTTP client would. Failures can be
//! injected before delivery (the server never sees the batch) or after it (the
//! server applied the batch but the response is lost).
//!
//! Like an HTTP client, the transport reports a session the server no longer
//! knows as [`TransportError::SessionExpired`] and opens a new one on the next
//! exchange.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::application::server_connector::{ServerConnector, ServerError};
use crate::application::session::ServerSession;
use crate::domain::command::CommandBatch;
use crate::domain::session::SessionId;
use crate::domain::transport::{Transport, TransportError};
use crate::infrastructure::codec::{Codec, JsonCodec};

pub struct LocalTransport {
    connector: Arc<ServerConnector>,
    session: RwLock<SessionId>,
    expired: AtomicBool,
    codec: JsonCodec,
    fail_requests: AtomicUsize,
    fail_responses: AtomicUsize,
}

impl LocalTransport {
    /// Open a new server session and bind the transport to it.
    pub async fn connect(connector: Arc<ServerConnector>) -> Result<Self, ServerError> {
        let session = connector.open_session().await?;
        Ok(Self {
            connector,
            session: RwLock::new(session.id),
            expired: AtomicBool::new(false),
            codec: JsonCodec,
            fail_requests: AtomicUsize::new(0),
            fail_responses: AtomicUsize::new(0),
        })
    }

    pub fn session_id(&self) -> SessionId {
        *self.session.read()
    }

    /// The server-side session this transport talks to.
    pub async fn session(&self) -> Result<Arc<ServerSession>, ServerError> {
        let id = self.session_id();
        self.connector
            .find_session(id)
            .await?
            .ok_or(ServerError::UnknownSession(id))
    }

    /// Fail the next `count` exchanges before they reach the server.
    pub fn fail_next_requests(&self, count: usize) {
        self.fail_requests.store(count, Ordering::SeqCst);
    }

    /// Deliver the next `count` exchanges but lose their responses.
    pub fn fail_next_responses(&self, count: usize) {
        self.fail_responses.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn current_session(&self) -> Result<SessionId, TransportError> {
        if !self.expired.load(Ordering::SeqCst) {
            return Ok(self.session_id());
        }
        let session = self
            .connector
            .open_session()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        *self.session.write() = session.id;
        self.expired.store(false, Ordering::SeqCst);
        info!(session_id = %session.id, "Opened replacement session");
        Ok(session.id)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn exchange(&self, batch: CommandBatch) -> Result<CommandBatch, TransportError> {
        if Self::take_failure(&self.fail_requests) {
            debug!(session_id = %self.session_id(), "Dropping request");
            return Err(TransportError::Connection("request dropped".to_string()));
        }

        let request = self
            .codec
            .encode(&batch)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let decoded = self
            .codec
            .decode(&request)
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        let session = self.current_session().await?;
        let response = match self.connector.handle(session, decoded).await {
            Ok(response) => response,
            Err(ServerError::UnknownSession(_)) => {
                self.expired.store(true, Ordering::SeqCst);
                return Err(TransportError::SessionExpired);
            }
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        };

        if Self::take_failure(&self.fail_responses) {
            debug!(session_id = %session, "Dropping response");
            return Err(TransportError::Connection("response dropped".to_string()));
        }

        let bytes = self
            .codec
            .encode(&response)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        self.codec
            .decode(&bytes)
            .map_err(|e| TransportError::Codec(e.to_string()))
    }

    async fn release(&self) -> Result<(), TransportError> {
        if !self.expired.load(Ordering::SeqCst) {
            self.connector.release(self.session_id());
        }
        Ok(())
    }
}
