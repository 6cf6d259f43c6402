// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Server Actions
//!
//! Named operations a client triggers with `invoke(name, params)`. The client
//! sends the parameters as a transient presentation model of type
//! [`PARAMETER_MODEL_TYPE`] (one `VALUE` and one `VALUE_TYPE` attribute per
//! parameter) followed by an `Action` command in the same batch.
//!
//! On the server [`execute_batch`] applies the batch in order. When an action
//! command is reached only the parameter models sent ahead of it exist, so each
//! handler sees its own parameters. The parameter models are deleted after the
//! handler ran, which also removes the client's copies on the next exchange.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::attribute::Tag;
use crate::domain::command::{Command, LONG_POLL_ACTION, PARAMETER_MODEL_TYPE, RELEASE_ACTION};
use crate::domain::converter::{ConversionError, Convertible};
use crate::domain::model_store::{ApplyReport, ModelStore, StoreError};
use crate::domain::presentation_model::ModelId;
use crate::domain::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("No handler registered for action '{0}'")]
    UnknownAction(String),

    #[error("Missing action parameter '{0}'")]
    MissingParameter(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Action failed: {0}")]
    Failed(String),
}

/// Parameters of one action invocation, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionParams {
    values: Vec<(String, Value)>,
}

impl ActionParams {
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Typed parameter; `Ok(None)` when absent or null.
    pub fn get_as<T: Convertible>(&self, name: &str) -> Result<Option<T>, ActionError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value).map(Some).ok_or_else(|| {
                ActionError::Conversion(ConversionError {
                    value: value.clone(),
                    target: std::any::type_name::<T>(),
                })
            }),
        }
    }

    pub fn require<T: Convertible>(&self, name: &str) -> Result<T, ActionError> {
        self.get_as(name)?
            .ok_or_else(|| ActionError::MissingParameter(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What a handler gets to work with. Store mutations made here are local
/// server changes and travel back to the client.
pub struct ActionContext<'a> {
    pub name: &'a str,
    pub params: ActionParams,
    pub store: &'a mut ModelStore,
}

pub type ActionHandler = Arc<dyn Fn(&mut ActionContext<'_>) -> Result<(), ActionError> + Send + Sync>;

/// Handlers by action name.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any previous handler of that name.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut ActionContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(action = %name, "Registering action handler");
        self.handlers.write().insert(name, Arc::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Option<ActionHandler> {
        self.handlers.read().get(name).cloned()
    }
}

/// Result of applying one client batch on the server.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub report: ApplyReport,
    pub long_poll: bool,
    pub release: bool,
    pub failed_actions: usize,
    /// Whether the store holds changes for the client after the batch.
    pub pending: bool,
}

/// Apply a client batch, dispatching application actions as they come.
pub fn execute_batch(store: &mut ModelStore, registry: &ActionRegistry, commands: Vec<Command>) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    let report = store.apply_remote_with(commands, |store, name| match name {
        LONG_POLL_ACTION => outcome.long_poll = true,
        RELEASE_ACTION => outcome.release = true,
        name => {
            if let Err(error) = run_action(store, registry, name) {
                warn!(action = name, error = %error, "Action failed");
                counter!("pmsync_commands_rejected_total", "kind" => "Action").increment(1);
                outcome.failed_actions += 1;
            }
        }
    });

    outcome.report = report;
    outcome.pending = store.has_pending_changes();
    outcome
}

fn run_action(store: &mut ModelStore, registry: &ActionRegistry, name: &str) -> Result<(), ActionError> {
    let (parameter_models, params) = collect_parameters(store);

    let result = match registry.handler(name) {
        Some(handler) => {
            debug!(action = name, params = params.len(), "Running action");
            let mut context = ActionContext {
                name,
                params,
                store: &mut *store,
            };
            handler(&mut context)
        }
        None => Err(ActionError::UnknownAction(name.to_string())),
    };

    for id in parameter_models {
        if let Err(error) = store.delete_model(&id) {
            debug!(model_id = %id, error = %error, "Parameter model already gone");
        }
    }
    result
}

fn collect_parameters(store: &ModelStore) -> (Vec<ModelId>, ActionParams) {
    let mut ids = Vec::new();
    let mut values = Vec::new();
    for model in store.find_models_by_type(PARAMETER_MODEL_TYPE) {
        ids.push(model.id().clone());
        values.extend(
            model
                .attributes()
                .iter()
                .filter(|a| a.tag() == Tag::Value)
                .map(|a| (a.name().to_string(), a.value().clone())),
        );
    }
    (ids, ActionParams::new(values))
}
