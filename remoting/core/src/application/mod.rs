// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod actions;
pub mod client_connector;
pub mod property;
pub mod server_connector;
pub mod session;
pub mod store_executor;

// Re-export use cases for convenience
pub use actions::{execute_batch, ActionContext, ActionError, ActionParams, ActionRegistry, BatchOutcome};
pub use client_connector::{ClientConnector, InvokeError, SyncError, SyncOutcome, SyncSettings, SyncState};
pub use property::{Property, PropertyError};
pub use server_connector::{ServerConnector, ServerError, ServerSettings};
pub use session::{RepositoryError, ServerSession, SessionRepository};
pub use store_executor::{ExecutorError, StoreHandle, StoreStatsSnapshot};
