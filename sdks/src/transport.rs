// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use pmsync_core::infrastructure::{Codec, JsonCodec};
use pmsync_core::presentation::api::SESSION_HEADER;
use pmsync_core::{Command, CommandBatch, Transport, TransportError, LONG_POLL_ACTION};

use crate::config::ClientConfiguration;

/// [`Transport`] posting command batches to a pmsync HTTP endpoint.
///
/// The session id handed out by the server on the first exchange is sent with
/// every later request. When the server answers `404` for that id the
/// exchange fails with [`TransportError::SessionExpired`] and the id is
/// forgotten, so the next exchange opens a new session.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    codec: JsonCodec,
    session: RwLock<Option<String>>,
    request_timeout: Duration,
    long_poll_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfiguration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connection_timeout())
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.server_endpoint.trim().to_string(),
            codec: JsonCodec,
            session: RwLock::new(None),
            request_timeout: config.request_timeout(),
            long_poll_timeout: config.long_poll_timeout(),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.read().clone()
    }

    /// End the server session. Does nothing before the first exchange.
    pub async fn close(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.write().take() else {
            return Ok(());
        };
        let response = self
            .client
            .delete(&self.endpoint)
            .header(SESSION_HEADER, &session)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(TransportError::Status(status.as_u16())),
        }
    }

    async fn post(&self, batch: &CommandBatch, timeout: Duration) -> Result<CommandBatch, TransportError> {
        let body = self
            .codec
            .encode(batch)
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, self.codec.content_type())
            .timeout(timeout)
            .body(body);
        let sent_session = self.session_id();
        if let Some(session) = &sent_session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND if sent_session.is_some() => return Err(TransportError::SessionExpired),
            status => return Err(TransportError::Status(status.as_u16())),
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut current = self.session.write();
            if current.as_deref() != Some(session) {
                debug!(session_id = session, "Server assigned session");
                *current = Some(session.to_string());
            }
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        self.codec
            .decode(&bytes)
            .map_err(|e| TransportError::Codec(e.to_string()))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, batch: CommandBatch) -> Result<CommandBatch, TransportError> {
        let timeout = if batch.contains_action(LONG_POLL_ACTION) {
            self.long_poll_timeout
        } else {
            self.request_timeout
        };
        let sent_session = self.session_id();
        let result = self.post(&batch, timeout).await;
        if let (Err(TransportError::SessionExpired), Some(expired)) = (&result, sent_session) {
            let mut current = self.session.write();
            if current.as_deref() == Some(expired.as_str()) {
                warn!(session_id = %expired, "Server no longer knows the session");
                *current = None;
            }
        }
        result
    }

    async fn release(&self) -> Result<(), TransportError> {
        if self.session_id().is_none() {
            return Ok(());
        }
        match self
            .post(&CommandBatch::new(vec![Command::release()]), self.request_timeout)
            .await
        {
            Ok(_) => Ok(()),
            // Nothing is held for a session the server dropped; the next exchange reports it.
            Err(TransportError::SessionExpired) => {
                debug!("Release targeted an expired session");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
