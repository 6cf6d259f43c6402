// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer
//!
//! HTTP surface that turns requests into connector calls. No synchronization
//! logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | `POST /remoting` exchanges, health and diagnostics |

pub mod api;
