// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Batch Protocol
//!
//! Commands are the only way to mutate a remote store. A [`CommandBatch`] is the
//! unit of one request/response exchange and is applied on the receiving side
//! inside a single store job.
//!
//! ## Wire Records
//!
//! ```json
//! {"kind": "ChangeAttributeValue", "modelId": "1-C", "attributeName": "count",
//!  "tag": "VALUE", "oldValue": {"type": 3, "value": 0}, "value": {"type": 3, "value": 5}}
//! ```
//!
//! | Kind | Effect on the receiver |
//! |------|------------------------|
//! | `CreatePresentationModel` | create the model, or reconcile values if it already exists |
//! | `DeletePresentationModel` | delete the model; absent models are ignored |
//! | `CreateAttribute` | add an attribute to an existing model |
//! | `ChangeAttributeValue` | set a value; equal values are no-ops |
//! | `ChangeAttributeMetadata` | change qualifier or base value |
//! | `Action` | run a named operation (`remoting:longPoll`, `remoting:release`, application actions) |

use serde::{Deserialize, Serialize};

use crate::domain::attribute::{AttributeKey, AttributeSnapshot, Tag};
use crate::domain::presentation_model::ModelId;
use crate::domain::value::Value;

/// Client asks the server to hold the exchange until it has changes.
pub const LONG_POLL_ACTION: &str = "remoting:longPoll";

/// Forces completion of an outstanding long poll.
pub const RELEASE_ACTION: &str = "remoting:release";

/// Model type of the transient models carrying action parameters.
pub const PARAMETER_MODEL_TYPE: &str = "@remoting:parameter@";

/// Attribute facet changed by a metadata command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataName {
    Qualifier,
    BaseValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Command {
    CreatePresentationModel {
        model_id: ModelId,
        model_type: String,
        attributes: Vec<AttributeSnapshot>,
    },
    DeletePresentationModel {
        model_id: ModelId,
    },
    CreateAttribute {
        model_id: ModelId,
        attribute: AttributeSnapshot,
    },
    ChangeAttributeValue {
        model_id: ModelId,
        attribute_name: String,
        #[serde(default)]
        tag: Tag,
        #[serde(default)]
        old_value: Value,
        #[serde(rename = "value")]
        new_value: Value,
    },
    ChangeAttributeMetadata {
        model_id: ModelId,
        attribute_name: String,
        #[serde(default)]
        tag: Tag,
        metadata: MetadataName,
        value: Value,
    },
    Action {
        name: String,
        /// Local completion handle for `invoke`; never sent.
        #[serde(skip)]
        ticket: Option<u64>,
    },
}

impl Command {
    pub fn action(name: impl Into<String>) -> Self {
        Command::Action {
            name: name.into(),
            ticket: None,
        }
    }

    pub fn long_poll() -> Self {
        Self::action(LONG_POLL_ACTION)
    }

    pub fn release() -> Self {
        Self::action(RELEASE_ACTION)
    }

    pub fn change_value(key: &AttributeKey, old_value: Value, new_value: Value) -> Self {
        Command::ChangeAttributeValue {
            model_id: key.model_id.clone(),
            attribute_name: key.name.clone(),
            tag: key.tag,
            old_value,
            new_value,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreatePresentationModel { .. } => "CreatePresentationModel",
            Command::DeletePresentationModel { .. } => "DeletePresentationModel",
            Command::CreateAttribute { .. } => "CreateAttribute",
            Command::ChangeAttributeValue { .. } => "ChangeAttributeValue",
            Command::ChangeAttributeMetadata { .. } => "ChangeAttributeMetadata",
            Command::Action { .. } => "Action",
        }
    }

    /// Model targeted by this command, if any.
    pub fn model_id(&self) -> Option<&ModelId> {
        match self {
            Command::CreatePresentationModel { model_id, .. }
            | Command::DeletePresentationModel { model_id }
            | Command::CreateAttribute { model_id, .. }
            | Command::ChangeAttributeValue { model_id, .. }
            | Command::ChangeAttributeMetadata { model_id, .. } => Some(model_id),
            Command::Action { .. } => None,
        }
    }

    pub fn action_name(&self) -> Option<&str> {
        match self {
            Command::Action { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Long poll and release only steer the exchange and are never retried.
    pub fn is_control_action(&self) -> bool {
        matches!(self.action_name(), Some(LONG_POLL_ACTION | RELEASE_ACTION))
    }
}

/// One request or response worth of commands.
///
/// Responses carrying server commands are numbered. The client echoes the
/// highest number it applied in `acknowledged` on its next request; until
/// then the server keeps the commands and sends them again with the next
/// response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    /// Set on a response whose long poll was released rather than completed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub released: bool,
    /// Response number, 0 when the response carries nothing to acknowledge.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sequence: u64,
    /// Highest response number the client has applied.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub acknowledged: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl CommandBatch {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }

    pub fn released() -> Self {
        Self {
            released: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn contains_action(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c.action_name() == Some(name))
    }

    /// True for a release request carrying nothing else.
    pub fn is_release_only(&self) -> bool {
        !self.commands.is_empty() && self.commands.iter().all(|c| c.action_name() == Some(RELEASE_ACTION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_value_wire_shape() {
        let key = AttributeKey::new("1-C", "count");
        let command = Command::change_value(&key, Value::Integer(0), Value::Integer(5));
        let json = serde_json::to_value(&command).unwrap();

        assert_eq!(
            json,
            json!({
                "kind": "ChangeAttributeValue",
                "modelId": "1-C",
                "attributeName": "count",
                "tag": "VALUE",
                "oldValue": {"type": 3, "value": 0},
                "value": {"type": 3, "value": 5}
            })
        );
    }

    #[test]
    fn test_action_ticket_is_not_serialized() {
        let command = Command::Action {
            name: "save".to_string(),
            ticket: Some(7),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json, json!({"kind": "Action", "name": "save"}));

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, Command::action("save"));
    }

    #[test]
    fn test_released_flag_omitted_when_false() {
        let json = serde_json::to_value(CommandBatch::default()).unwrap();
        assert_eq!(json, json!({"commands": []}));

        let json = serde_json::to_value(CommandBatch::released()).unwrap();
        assert_eq!(json["released"], true);
    }

    #[test]
    fn test_sequence_numbers_on_the_wire() {
        let response = CommandBatch {
            sequence: 3,
            ..CommandBatch::new(vec![Command::release()])
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sequence"], 3);
        assert!(json.get("acknowledged").is_none());

        let request: CommandBatch = serde_json::from_value(json!({"commands": [], "acknowledged": 3})).unwrap();
        assert_eq!(request.acknowledged, 3);
        assert_eq!(request.sequence, 0);
    }

    #[test]
    fn test_control_actions() {
        assert!(Command::long_poll().is_control_action());
        assert!(Command::release().is_control_action());
        assert!(!Command::action("save").is_control_action());
        assert!(CommandBatch::new(vec![Command::release()]).is_release_only());
        assert!(!CommandBatch::default().is_release_only());
    }
}
