// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: presentation models, their stores and the command protocol.
//!
//! Nothing in here is async or shared; a [`model_store::ModelStore`] is plain
//! data driven through `&mut self`. The application layer decides where it runs.

pub mod attribute;
pub mod change_tracker;
pub mod command;
pub mod config;
pub mod converter;
pub mod listeners;
pub mod model_store;
pub mod presentation_model;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod value;

pub use attribute::{Attribute, AttributeKey, AttributeSnapshot, Tag, ValueChange};
pub use command::{Command, CommandBatch, MetadataName, LONG_POLL_ACTION, PARAMETER_MODEL_TYPE, RELEASE_ACTION};
pub use converter::{ConversionError, Convertible, Converter, ValueConverter};
pub use listeners::{AttributeRemoved, ModelEvent};
pub use model_store::{ApplyReport, ModelStore, PresentationModelBuilder, StoreError};
pub use presentation_model::{ModelId, PresentationModel};
pub use session::{SessionId, Side};
pub use subscription::Subscription;
pub use transport::{Transport, TransportError};
pub use value::{TypeMismatch, Value, ValueType};
