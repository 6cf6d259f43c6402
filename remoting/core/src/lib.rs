// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! pmsync core
//!
//! Keeps presentation models synchronized between a server and its clients.
//!
//! # Architecture
//!
//! - **domain:** attributes, models, model stores, change tracking, commands
//! - **application:** store executors, client/server connectors, actions
//! - **infrastructure:** codec, long-poll slots, diagnostics, in-process transport
//! - **presentation:** HTTP endpoint

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
