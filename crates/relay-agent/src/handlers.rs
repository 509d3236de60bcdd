//! Built-in endpoint command handlers (spec.md §6.4): `health_status`,
//! `get_logs`, `set_log_level`, `get_log_stats`, `hot_reload`,
//! `list_handlers`. `restart_client` lives in [`crate::watchdog`] and
//! module loading in [`crate::plugins`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_observe::{LogLevel, LogRing};
use relay_registry::{Handler, HandlerError, HandlerKind, Registry};
use relay_reload::{ReloadAction, ReloadManager};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

/// `health_status` — samples the process then reports it (C9).
pub struct HealthStatusHandler {
    pub health: Arc<relay_health::HealthMonitor>,
}

#[async_trait]
impl Handler for HealthStatusHandler {
    async fn invoke(&self, _params: Value) -> Result<Value, HandlerError> {
        self.health.sample();
        serde_json::to_value(self.health.report()).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

#[derive(Debug, Deserialize, Default)]
struct GetLogsParams {
    level: Option<String>,
    name: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

/// `get_logs {level?, name?, since?, limit?}` (C10).
pub struct GetLogsHandler {
    pub logs: Arc<LogRing>,
}

#[async_trait]
impl Handler for GetLogsHandler {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        let params: GetLogsParams = if params.is_null() {
            GetLogsParams::default()
        } else {
            serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))?
        };

        let min_level = match params.level.as_deref() {
            Some(level) => Some(parse_log_level(level)?),
            None => None,
        };
        let limit = params.limit.unwrap_or(100);

        let mut records = self.logs.get(min_level, usize::MAX);
        if let Some(name) = &params.name {
            records.retain(|r| r.target.contains(name.as_str()));
        }
        if let Some(since) = params.since {
            records.retain(|r| r.timestamp >= since);
        }
        records.truncate(limit);

        serde_json::to_value(records).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

fn parse_log_level(level: &str) -> Result<LogLevel, HandlerError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(HandlerError::InvalidParams(format!("unknown log level: {other}"))),
    }
}

/// `get_log_stats` (C10).
pub struct GetLogStatsHandler {
    pub logs: Arc<LogRing>,
}

#[async_trait]
impl Handler for GetLogStatsHandler {
    async fn invoke(&self, _params: Value) -> Result<Value, HandlerError> {
        serde_json::to_value(self.logs.stats()).map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SetLogLevelParams {
    level: String,
    logger: Option<String>,
}

/// `set_log_level {level, logger?}` (C10) — reconfigures the running
/// process's `EnvFilter` without a restart, via the reload handle installed
/// at startup.
pub struct SetLogLevelHandler {
    pub reload_handle: tracing_subscriber::reload::Handle<EnvFilter, TracingRegistry>,
}

#[async_trait]
impl Handler for SetLogLevelHandler {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        let params: SetLogLevelParams = serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
        let level = parse_tracing_level(&params.level)?;

        let directive_str = match &params.logger {
            Some(logger) => format!("{logger}={level}"),
            None => level.to_string(),
        };
        let directive = directive_str
            .parse()
            .map_err(|e: tracing_subscriber::filter::ParseError| HandlerError::InvalidParams(e.to_string()))?;

        let filter = match &params.logger {
            Some(_) => EnvFilter::from_default_env().add_directive(directive),
            None => EnvFilter::new(level.to_string()),
        };

        self.reload_handle
            .reload(filter)
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        Ok(json!({"level": params.level, "logger": params.logger}))
    }
}

fn parse_tracing_level(level: &str) -> Result<Level, HandlerError> {
    level
        .parse()
        .map_err(|_| HandlerError::InvalidParams(format!("unknown log level: {level}")))
}

#[derive(Debug, Deserialize)]
struct HotReloadParams {
    #[serde(default = "default_action")]
    action: String,
    #[allow(dead_code)]
    target: Option<String>,
}

fn default_action() -> String {
    "status".to_string()
}

/// `hot_reload {action: status|reload_module|reload_config|reload_all, target?}` (C11).
pub struct HotReloadHandler {
    pub reload: Arc<ReloadManager>,
    pub module_loader: Arc<crate::plugins::ModuleLoader>,
}

#[async_trait]
impl Handler for HotReloadHandler {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        let params: HotReloadParams = if params.is_null() {
            HotReloadParams { action: default_action(), target: None }
        } else {
            serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))?
        };

        match params.action.as_str() {
            "status" => serde_json::to_value(self.reload.current_config()).map_err(|e| HandlerError::Failed(e.to_string())),
            "reload_module" => self.reload_modules(),
            "reload_config" => {
                self.reload
                    .trigger(ReloadAction::Config)
                    .map_err(|e| HandlerError::Failed(e.to_string()))?;
                Ok(json!({"action": "reload_config"}))
            }
            "reload_all" => {
                self.reload_modules()?;
                self.reload
                    .trigger(ReloadAction::Config)
                    .map_err(|e| HandlerError::Failed(e.to_string()))?;
                Ok(json!({"action": "reload_all"}))
            }
            other => Err(HandlerError::InvalidParams(format!("unknown hot_reload action: {other}"))),
        }
    }
}

impl HotReloadHandler {
    fn reload_modules(&self) -> Result<Value, HandlerError> {
        let loaded = self.module_loader.reload().map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(json!({"action": "reload_module", "loaded": loaded}))
    }
}

/// `list_handlers` — the currently-registered command names.
pub struct ListHandlersHandler {
    pub registry: Registry,
}

#[async_trait]
impl Handler for ListHandlersHandler {
    async fn invoke(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(json!(self.registry.list()))
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Cooperative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_health::HealthThresholds;
    use relay_observe::LogRecord;

    #[tokio::test]
    async fn health_status_reports_a_sample() {
        let handler = HealthStatusHandler {
            health: Arc::new(relay_health::HealthMonitor::new(10, HealthThresholds::default())),
        };
        let result = handler.invoke(Value::Null).await.unwrap();
        assert!(result.get("status").is_some());
    }

    #[tokio::test]
    async fn get_logs_filters_by_level() {
        let logs = Arc::new(LogRing::new(100));
        logs.push(LogRecord {
            level: LogLevel::Info,
            target: "relay_agent".to_string(),
            message: "hello".to_string(),
            timestamp: Utc::now(),
        });
        logs.push(LogRecord {
            level: LogLevel::Error,
            target: "relay_agent".to_string(),
            message: "boom".to_string(),
            timestamp: Utc::now(),
        });

        let handler = GetLogsHandler { logs };
        let result = handler.invoke(json!({"level": "error"})).await.unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_logs_with_unknown_level_is_invalid_params() {
        let handler = GetLogsHandler { logs: Arc::new(LogRing::new(10)) };
        let err = handler.invoke(json!({"level": "nope"})).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn list_handlers_reports_registered_names() {
        let registry = Registry::new();
        registry.register("health_status", Arc::new(HealthStatusHandler {
            health: Arc::new(relay_health::HealthMonitor::new(10, HealthThresholds::default())),
        }));
        let handler = ListHandlersHandler { registry };
        let result = handler.invoke(Value::Null).await.unwrap();
        assert_eq!(result, json!(["health_status"]));
    }
}
