//! Wire envelope — the unit of transport between any two fabric peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single JSON message on the wire, immutable once sent.
///
/// The `type` field selects the payload shape. `welcome` (spec.md §6.1) is
/// modeled as the payload of an [`Envelope::Ack`] rather than a ninth wire
/// type — the spec's own glossary treats "ack (or equivalent welcome)" as
/// one concept, and collapsing them avoids a redundant variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Hello {
        id: String,
        timestamp: DateTime<Utc>,
        payload: HelloPayload,
    },
    Register {
        id: String,
        timestamp: DateTime<Utc>,
        payload: RegisterPayload,
    },
    Ack {
        id: String,
        timestamp: DateTime<Utc>,
        payload: AckPayload,
    },
    Command {
        id: String,
        timestamp: DateTime<Utc>,
        payload: CommandPayload,
    },
    Response {
        id: String,
        timestamp: DateTime<Utc>,
        payload: crate::response::Response,
    },
    Heartbeat {
        id: String,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        payload: HeartbeatPayload,
    },
    Event {
        id: String,
        timestamp: DateTime<Utc>,
        payload: Value,
    },
    Error {
        id: String,
        timestamp: DateTime<Utc>,
        payload: ErrorEnvelopePayload,
    },
}

impl Envelope {
    /// The correlation id — unique per sender, echoed by the response.
    pub fn id(&self) -> &str {
        match self {
            Envelope::Hello { id, .. }
            | Envelope::Register { id, .. }
            | Envelope::Ack { id, .. }
            | Envelope::Command { id, .. }
            | Envelope::Response { id, .. }
            | Envelope::Heartbeat { id, .. }
            | Envelope::Event { id, .. }
            | Envelope::Error { id, .. } => id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Envelope::Hello { timestamp, .. }
            | Envelope::Register { timestamp, .. }
            | Envelope::Ack { timestamp, .. }
            | Envelope::Command { timestamp, .. }
            | Envelope::Response { timestamp, .. }
            | Envelope::Heartbeat { timestamp, .. }
            | Envelope::Event { timestamp, .. }
            | Envelope::Error { timestamp, .. } => *timestamp,
        }
    }

    /// The `type` tag as it appears on the wire, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Hello { .. } => "hello",
            Envelope::Register { .. } => "register",
            Envelope::Ack { .. } => "ack",
            Envelope::Command { .. } => "command",
            Envelope::Response { .. } => "response",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::Event { .. } => "event",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn heartbeat(id: impl Into<String>) -> Self {
        Envelope::Heartbeat {
            id: id.into(),
            timestamp: Utc::now(),
            payload: HeartbeatPayload::default(),
        }
    }

    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Envelope::Error {
            id: id.into(),
            timestamp: Utc::now(),
            payload: ErrorEnvelopePayload {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn response(id: impl Into<String>, payload: crate::response::Response) -> Self {
        Envelope::Response {
            id: id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn command(id: impl Into<String>, payload: CommandPayload) -> Self {
        Envelope::Command {
            id: id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloPayload {
    #[serde(default)]
    pub note: Option<String>,
}

/// Sent endpoint→hub (or admin→hub) to join the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub identity: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: u32,
    /// `endpoint` or `admin`; admins rarely bother to register explicitly
    /// but may to advertise a label.
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "endpoint".to_string()
}

/// Hub's acceptance of a `register` (doubles as spec.md's `welcome`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub peer_id: u64,
    pub server_time: DateTime<Utc>,
}

/// A command request. When sent admin→hub as a forward, `command` is the
/// literal string `forward_command` and `params` holds
/// `{target_identity, inner_command, inner_params, timeout_s?}` per §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    #[serde(default = "default_params")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
}

fn default_params() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelopePayload {
    pub code: String,
    pub message: String,
}

/// Params for the admin `forward_command` / `broadcast_command` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardCommandParams {
    pub target_identity: String,
    pub inner_command: String,
    #[serde(default = "default_params")]
    pub inner_params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastCommandParams {
    pub inner_command: String,
    #[serde(default = "default_params")]
    pub inner_params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrips_through_json() {
        let env = Envelope::heartbeat("hb-1");
        let json = serde_json::to_string(&env).expect("serialize");
        let back: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id(), "hb-1");
        assert_eq!(back.type_name(), "heartbeat");
    }

    #[test]
    fn command_payload_defaults_params_to_empty_object() {
        let json = r#"{"command": "echo"}"#;
        let payload: CommandPayload = serde_json::from_str(json).expect("deserialize");
        assert!(payload.params.is_object());
        assert!(payload.timeout_s.is_none());
    }

    #[test]
    fn register_payload_defaults_role_to_endpoint() {
        let json = r#"{"identity": "u1", "capabilities": ["echo"], "version": 1}"#;
        let payload: RegisterPayload = serde_json::from_str(json).expect("deserialize");
        assert_eq!(payload.role, "endpoint");
    }

    #[test]
    fn unknown_type_tag_fails_to_parse() {
        let json = r#"{"type": "bogus", "id": "x", "timestamp": "2024-01-01T00:00:00Z", "payload": {}}"#;
        let result: Result<Envelope, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
