//! Canonical success/error response envelope (spec.md §4.2, §6.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error codes the core emits. Kept as `&'static str` constants rather than
/// an enum so plugin/handler code outside this crate can supply its own
/// `UPPER_SNAKE` codes without a dependency cycle.
pub mod codes {
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
    pub const STALE_ENDPOINT: &str = "STALE_ENDPOINT";
    pub const DISCONNECT: &str = "DISCONNECT";
    pub const UNKNOWN_TARGET: &str = "UNKNOWN_TARGET";
    pub const EVICTED: &str = "EVICTED";
    pub const RESTARTING: &str = "RESTARTING";
    pub const RELOAD_FAILED: &str = "RELOAD_FAILED";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            message: message.into(),
            error_type: code.clone(),
            code,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub command: String,
    pub execution_time: f64,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// The canonical handler-result shape (spec.md §4.2). Produced exclusively
/// by the scheduler (C4), never constructed directly by a handler —
/// `execution_time` is measured by the caller, per §4.2's contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn success(command: impl Into<String>, data: Value, execution_time: f64) -> Self {
        Self {
            success: true,
            timestamp: Utc::now(),
            error: None,
            data: Some(data),
            message: None,
            metadata: ResponseMetadata {
                command: command.into(),
                execution_time,
                extra: Map::new(),
            },
        }
    }

    pub fn success_with_message(
        command: impl Into<String>,
        data: Value,
        message: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        let mut r = Self::success(command, data, execution_time);
        r.message = Some(message.into());
        r
    }

    pub fn error(command: impl Into<String>, error: ErrorInfo, execution_time: f64) -> Self {
        Self {
            success: false,
            timestamp: Utc::now(),
            error: Some(error),
            data: None,
            message: None,
            metadata: ResponseMetadata {
                command: command.into(),
                execution_time,
                extra: Map::new(),
            },
        }
    }

    /// Wrap a raw JSON value as a success response — the "legacy handler
    /// returned a dict" conversion rule from spec.md §4.2.
    pub fn from_raw(command: impl Into<String>, raw: Value, execution_time: f64) -> Self {
        Self::success(command, raw, execution_time)
    }

    /// Classify a handler panic/error into a `HANDLER_FAILED` response
    /// unless the handler already supplied a typed [`ErrorInfo`].
    pub fn from_handler_failure(
        command: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        let error = ErrorInfo::new(codes::HANDLER_FAILED, message).with_type(error_type);
        Self::error(command, error, execution_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_has_no_error() {
        let r = Response::success("echo", serde_json::json!({"x": 1}), 0.01);
        assert!(r.success);
        assert!(r.error.is_none());
        assert_eq!(r.metadata.command, "echo");
    }

    #[test]
    fn error_response_has_no_data() {
        let err = ErrorInfo::new(codes::TIMEOUT, "deadline exceeded");
        let r = Response::error("sleep10", err, 1.0);
        assert!(!r.success);
        assert!(r.data.is_none());
        assert_eq!(r.error.unwrap().code, codes::TIMEOUT);
    }

    #[test]
    fn response_serializes_null_error_on_success() {
        let r = Response::success("echo", Value::Null, 0.0);
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["error"].is_null());
    }

    #[test]
    fn from_handler_failure_sets_handler_failed_code() {
        let r = Response::from_handler_failure("boom", "RuntimeError", "kaboom", 0.02);
        assert_eq!(r.error.unwrap().code, codes::HANDLER_FAILED);
    }
}
