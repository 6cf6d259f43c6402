// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Byte-level encoding of command batches.

use bytes::Bytes;

use crate::domain::command::CommandBatch;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode command batch: {0}")]
    Encode(String),

    #[error("Failed to decode command batch: {0}")]
    Decode(String),
}

pub trait Codec: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn encode(&self, batch: &CommandBatch) -> Result<Bytes, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<CommandBatch, CodecError>;
}

/// JSON wire format (`application/json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, batch: &CommandBatch) -> Result<Bytes, CodecError> {
        serde_json::to_vec(batch)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CommandBatch, CodecError> {
        // An empty body is an empty batch.
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CommandBatch::default());
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribute::AttributeKey;
    use crate::domain::command::Command;
    use crate::domain::value::Value;

    #[test]
    fn test_decode_reads_wire_records() {
        let body = br#"{"commands":[
            {"kind":"CreatePresentationModel","modelId":"1-C","modelType":"Counter",
             "attributes":[{"name":"count","tag":"VALUE","value":{"type":3,"value":0},"valueType":3}]},
            {"kind":"ChangeAttributeValue","modelId":"1-C","attributeName":"count",
             "value":{"type":3,"value":5}},
            {"kind":"Action","name":"remoting:longPoll"}
        ]}"#;

        let batch = JsonCodec.decode(body).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.commands[1],
            Command::change_value(&AttributeKey::new("1-C", "count"), Value::Null, Value::Integer(5))
        );
        assert!(batch.contains_action("remoting:longPoll"));
        assert!(!batch.released);
    }

    #[test]
    fn test_empty_body_is_empty_batch() {
        assert!(JsonCodec.decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        assert!(matches!(JsonCodec.decode(b"{\"commands\": 3}"), Err(CodecError::Decode(_))));
        let unknown_kind = br#"{"commands":[{"kind":"Teleport"}]}"#;
        assert!(JsonCodec.decode(unknown_kind).is_err());
    }
}
