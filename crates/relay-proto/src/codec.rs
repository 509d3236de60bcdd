//! Frame codec (C1) — JSON-over-WebSocket envelope encode/decode.

use crate::envelope::Envelope;
use thiserror::Error;

/// Default maximum decoded message size: 16 MiB, to accommodate
/// base64-encoded screenshot payloads (spec.md §4.1).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message exceeds max size of {max} bytes (got {actual})")]
    TooLarge { max: usize, actual: usize },
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
    #[error("envelope missing required field: {0}")]
    MissingField(&'static str),
}

/// Encode an envelope as a UTF-8 JSON text frame body.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::MalformedJson(e.to_string()))
}

/// Decode a text frame into an envelope, enforcing `max_size` and
/// rejecting any envelope missing `type` or `id` (spec.md §4.1).
pub fn decode(text: &str, max_size: usize) -> Result<Envelope, CodecError> {
    if text.len() > max_size {
        return Err(CodecError::TooLarge {
            max: max_size,
            actual: text.len(),
        });
    }

    let raw: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CodecError::MalformedJson(e.to_string()))?;

    if !raw.is_object() {
        return Err(CodecError::MalformedJson("top-level value is not an object".into()));
    }
    if raw.get("type").and_then(|v| v.as_str()).is_none() {
        return Err(CodecError::MissingField("type"));
    }
    if raw.get("id").and_then(|v| v.as_str()).is_none() {
        return Err(CodecError::MissingField("id"));
    }

    serde_json::from_value(raw).map_err(|e| CodecError::MalformedJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_is_identity() {
        let env = Envelope::heartbeat("hb-1");
        let text = encode(&env).unwrap();
        let back = decode(&text, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(back.id(), env.id());
        assert_eq!(back.type_name(), env.type_name());
    }

    #[test]
    fn decode_rejects_missing_id() {
        let text = r#"{"type": "heartbeat", "timestamp": "2024-01-01T00:00:00Z", "payload": {}}"#;
        let err = decode(text, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::MissingField("id")));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let text = r#"{"id": "x", "timestamp": "2024-01-01T00:00:00Z", "payload": {}}"#;
        let err = decode(text, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::MissingField("type")));
    }

    #[test]
    fn decode_rejects_oversized_message() {
        let big = "x".repeat(100);
        let err = decode(&big, 10).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { .. }));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = decode("not json at all", DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::MalformedJson(_)));
    }
}
