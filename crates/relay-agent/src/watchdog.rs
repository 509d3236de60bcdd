//! Watchdog protocol, client side (C12) — handles `restart_client`: answer
//! success immediately with the scheduled delay, then either hand off to
//! `relay-watchdog` via a sentinel file or re-exec in place.

use async_trait::async_trait;
use relay_registry::{Handler, HandlerError, HandlerKind};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct RestartParams {
    #[serde(default = "default_delay_s")]
    delay_s: f64,
    #[serde(default = "default_use_watchdog")]
    use_watchdog: bool,
    #[serde(default)]
    reason: Option<String>,
}

fn default_delay_s() -> f64 {
    5.0
}

fn default_use_watchdog() -> bool {
    true
}

/// Implements the `restart_client` endpoint command (spec.md §4.12, §6.4).
pub struct RestartHandler {
    sentinel_path: PathBuf,
    argv0: PathBuf,
    args: Vec<String>,
}

impl RestartHandler {
    /// `argv0`/`args` are the process's own executable path and original
    /// arguments, captured at startup, so a watchdog-less restart can
    /// re-exec with the same invocation.
    pub fn new(sentinel_path: PathBuf, argv0: PathBuf, args: Vec<String>) -> Self {
        Self { sentinel_path, argv0, args }
    }
}

#[async_trait]
impl Handler for RestartHandler {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        let params: RestartParams = if params.is_null() {
            RestartParams {
                delay_s: default_delay_s(),
                use_watchdog: default_use_watchdog(),
                reason: None,
            }
        } else {
            serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))?
        };

        info!(
            delay_s = params.delay_s,
            use_watchdog = params.use_watchdog,
            reason = ?params.reason,
            "restart_client scheduled"
        );

        let sentinel_path = self.sentinel_path.clone();
        let argv0 = self.argv0.clone();
        let args = self.args.clone();
        let delay = Duration::from_secs_f64(params.delay_s.max(0.0));
        let use_watchdog = params.use_watchdog;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if use_watchdog {
                if let Err(e) = std::fs::write(&sentinel_path, b"") {
                    warn!(path = %sentinel_path.display(), error = %e, "failed to write restart sentinel");
                }
                info!("exiting for watchdog respawn");
            } else {
                info!(program = %argv0.display(), "re-executing in place (no watchdog)");
                if let Err(e) = tokio::process::Command::new(&argv0).args(&args).spawn() {
                    warn!(error = %e, "failed to spawn replacement process, exiting anyway");
                }
            }
            std::process::exit(0);
        });

        Ok(json!({
            "scheduled": true,
            "delay_s": params.delay_s,
            "use_watchdog": use_watchdog,
        }))
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Cooperative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_responds_immediately_with_the_scheduled_delay() {
        let dir = tempfile::tempdir().unwrap();
        let handler = RestartHandler::new(dir.path().join("sentinel"), PathBuf::from("relay-agent"), vec![]);

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            handler.invoke(json!({"delay_s": 30.0, "use_watchdog": true})),
        )
        .await
        .expect("invoke must return promptly, not wait out the delay")
        .unwrap();

        assert_eq!(result["scheduled"], json!(true));
        assert_eq!(result["delay_s"], json!(30.0));
    }

    #[tokio::test]
    async fn missing_params_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let handler = RestartHandler::new(dir.path().join("sentinel"), PathBuf::from("relay-agent"), vec![]);
        let result = handler.invoke(Value::Null).await.unwrap();
        assert_eq!(result["delay_s"], json!(5.0));
        assert_eq!(result["use_watchdog"], json!(true));
    }
}
