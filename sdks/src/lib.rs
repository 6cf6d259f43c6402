// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! pmsync Rust SDK
//!
//! Connect a client model store to a pmsync server over HTTP.

pub mod config;
pub mod context;
pub mod transport;

pub use config::{ClientConfiguration, ConfigurationError};
pub use context::{ClientContext, ClientContextFactory};
pub use transport::HttpTransport;
