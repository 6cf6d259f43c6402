// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transport boundary between a client connector and its server.

use async_trait::async_trait;

use crate::domain::command::CommandBatch;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Exchange timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Codec error: {0}")]
    Codec(String),

    /// The server no longer knows the session. The next exchange starts a new one.
    #[error("Server session expired")]
    SessionExpired,
}

/// Carries one batch to the server and returns the server's batch.
///
/// Implementations must be safe to call concurrently: `release` is issued
/// while an `exchange` holding a long poll is still outstanding.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, batch: CommandBatch) -> Result<CommandBatch, TransportError>;

    /// Ask the server to complete an outstanding long poll now.
    async fn release(&self) -> Result<(), TransportError>;
}
