// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod codec;
pub mod diagnostics;
pub mod local_transport;
pub mod long_poll;
pub mod session_repository;

pub use codec::{Codec, CodecError, JsonCodec};
pub use diagnostics::{DiagnosticsEntry, DiagnosticsRegistry, DiagnosticsSource};
pub use local_transport::LocalTransport;
pub use long_poll::{LongPollRegistry, LongPollTicket};
pub use session_repository::InMemorySessionRepository;
