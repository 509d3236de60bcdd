//! Wire protocol types for the remote-control fabric.
//!
//! Defines the envelope shared by every hub/endpoint/admin connection and
//! the canonical success/error response shape handlers resolve to.

#![forbid(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod response;

pub use codec::{decode, encode, CodecError, DEFAULT_MAX_MESSAGE_SIZE};
pub use envelope::{
    AckPayload, BroadcastCommandParams, CommandPayload, Envelope, ErrorEnvelopePayload,
    ForwardCommandParams, HeartbeatPayload, HelloPayload, RegisterPayload,
};
pub use response::{codes, ErrorInfo, Response, ResponseMetadata};

/// Validate a peer identity string (hostnames/usernames advertised at
/// registration). Mirrors the teacher's `validate_instance_id` shape.
pub fn validate_identity(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 256
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '\\'))
}

/// Validate a command name (dotted lower-snake convention used throughout
/// the admin and endpoint command surfaces, e.g. `health_status`,
/// `forward_command`).
pub fn validate_command_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identity_accepts_typical_windows_session_strings() {
        assert!(validate_identity("DESKTOP-AB12\\alice"));
        assert!(validate_identity("alice@corp.example"));
        assert!(!validate_identity(""));
        assert!(!validate_identity("has space"));
    }

    #[test]
    fn validate_command_name_rejects_uppercase_and_spaces() {
        assert!(validate_command_name("health_status"));
        assert!(validate_command_name("forward_command"));
        assert!(!validate_command_name("Health Status"));
        assert!(!validate_command_name(""));
    }
}
