//! Config loader (C14) — keyed configuration with defaults and environment
//! overrides (spec.md §4.14), plus the diff used by the hot-reload config
//! axis (§4.11.2) to tell live-safe changes from restart-required ones.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("parse {0}: {1}")]
    Parse(String, serde_json::Error),
    #[error("write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("serialize: {0}")]
    Serialize(serde_json::Error),
}

// ─── Section structs, one per §4.14 key group ─────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub host: String,
    pub port: u16,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9998,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    pub hub_url: String,
    pub identity: String,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:9998".to_string(),
            identity: default_identity(),
        }
    }
}

fn default_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub interval_s: u64,
    pub stale_multiplier: f64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_s: 30,
            stale_multiplier: 2.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub initial_s: u64,
    pub max_s: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_s: 1,
            max_s: 60,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSection {
    pub default_timeout_s: u64,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            default_timeout_s: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolSection {
    pub size: usize,
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self { size: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub sample_interval_s: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            sample_interval_s: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub dir: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
    pub ring_size: usize,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs/"),
            max_bytes: 10_485_760,
            backups: 5,
            ring_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadSection {
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for HotReloadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 300,
        }
    }
}

/// The full keyed config tree from spec.md §4.14.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FabricConfig {
    pub hub: HubSection,
    pub endpoint: EndpointSection,
    pub heartbeat: HeartbeatSection,
    pub reconnect: ReconnectSection,
    pub command: CommandSection,
    pub worker_pool: WorkerPoolSection,
    pub health: HealthSection,
    pub log: LogSection,
    pub hot_reload: HotReloadSection,
}

impl FabricConfig {
    /// Load from a JSON file, falling back to defaults for any field the
    /// file omits, then layer environment overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(display.clone(), e))?;
            serde_json::from_str(&data).map_err(|e| ConfigError::Parse(display.clone(), e))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Write(path.display().to_string(), e))?;
        }
        let data = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, data).map_err(|e| ConfigError::Write(path.display().to_string(), e))
    }

    /// Apply `RELAY_<SECTION>_<FIELD>` environment overrides (this fabric's
    /// choice of prefix for spec.md §4.14's generic `OVERRIDE_` convention —
    /// see SPEC_FULL.md §4.C).
    pub fn apply_env_overrides(&mut self) {
        apply_str(&mut self.hub.host, "RELAY_HUB_HOST");
        apply_parsed(&mut self.hub.port, "RELAY_HUB_PORT");
        apply_str(&mut self.endpoint.hub_url, "RELAY_ENDPOINT_HUB_URL");
        apply_str(&mut self.endpoint.identity, "RELAY_ENDPOINT_IDENTITY");
        apply_parsed(&mut self.heartbeat.interval_s, "RELAY_HEARTBEAT_INTERVAL_S");
        apply_parsed(
            &mut self.heartbeat.stale_multiplier,
            "RELAY_HEARTBEAT_STALE_MULTIPLIER",
        );
        apply_parsed(&mut self.reconnect.initial_s, "RELAY_RECONNECT_INITIAL_S");
        apply_parsed(&mut self.reconnect.max_s, "RELAY_RECONNECT_MAX_S");
        apply_parsed(&mut self.reconnect.multiplier, "RELAY_RECONNECT_MULTIPLIER");
        apply_parsed(&mut self.reconnect.jitter, "RELAY_RECONNECT_JITTER");
        apply_parsed(
            &mut self.command.default_timeout_s,
            "RELAY_COMMAND_DEFAULT_TIMEOUT_S",
        );
        apply_parsed(&mut self.worker_pool.size, "RELAY_WORKER_POOL_SIZE");
        apply_parsed(
            &mut self.health.sample_interval_s,
            "RELAY_HEALTH_SAMPLE_INTERVAL_S",
        );
        apply_path(&mut self.log.dir, "RELAY_LOG_DIR");
        apply_parsed(&mut self.log.max_bytes, "RELAY_LOG_MAX_BYTES");
        apply_parsed(&mut self.log.backups, "RELAY_LOG_BACKUPS");
        apply_parsed(&mut self.log.ring_size, "RELAY_LOG_RING_SIZE");
        apply_parsed(&mut self.hot_reload.enabled, "RELAY_HOT_RELOAD_ENABLED");
        apply_parsed(&mut self.hot_reload.debounce_ms, "RELAY_HOT_RELOAD_DEBOUNCE_MS");
    }
}

fn apply_str(field: &mut String, key: &str) {
    if let Ok(v) = std::env::var(key) {
        *field = v;
    }
}

fn apply_path(field: &mut PathBuf, key: &str) {
    if let Ok(v) = std::env::var(key) {
        *field = PathBuf::from(v);
    }
}

fn apply_parsed<T: std::str::FromStr>(field: &mut T, key: &str) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        } else {
            tracing::warn!(key, value = %v, "ignoring unparseable env override");
        }
    }
}

// ─── Hot-reload config diff (§4.11.2) ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Can be applied to the running process without a restart.
    LiveSafe,
    /// Requires a full process restart to take effect.
    RestartRequired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub key: &'static str,
    pub kind: ChangeKind,
}

/// Sections whose fields change the identity of a connection (hub address,
/// listen port) are not live-safe; everything else (intervals, thresholds,
/// pool sizes, log rotation knobs) is.
pub fn diff(old: &FabricConfig, new: &FabricConfig) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    let mut restart_required = |cond: bool, key: &'static str| {
        if cond {
            changes.push(ConfigChange {
                key,
                kind: ChangeKind::RestartRequired,
            });
        }
    };
    restart_required(old.hub != new.hub, "hub");
    restart_required(old.endpoint.hub_url != new.endpoint.hub_url, "endpoint.hub_url");

    let mut live_safe = |cond: bool, key: &'static str| {
        if cond {
            changes.push(ConfigChange {
                key,
                kind: ChangeKind::LiveSafe,
            });
        }
    };
    live_safe(old.endpoint.identity != new.endpoint.identity, "endpoint.identity");
    live_safe(old.heartbeat != new.heartbeat, "heartbeat");
    live_safe(old.reconnect != new.reconnect, "reconnect");
    live_safe(old.command != new.command, "command");
    live_safe(old.worker_pool != new.worker_pool, "worker_pool");
    live_safe(old.health != new.health, "health");
    live_safe(old.log != new.log, "log");
    live_safe(old.hot_reload != new.hot_reload, "hot_reload");

    changes
}

/// True if any change in the set requires a process restart.
pub fn requires_restart(changes: &[ConfigChange]) -> bool {
    changes.iter().any(|c| c.kind == ChangeKind::RestartRequired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = FabricConfig::default();
        assert_eq!(c.hub.host, "0.0.0.0");
        assert_eq!(c.hub.port, 9998);
        assert_eq!(c.heartbeat.interval_s, 30);
        assert_eq!(c.heartbeat.stale_multiplier, 2.5);
        assert_eq!(c.reconnect.initial_s, 1);
        assert_eq!(c.reconnect.max_s, 60);
        assert_eq!(c.command.default_timeout_s, 60);
        assert_eq!(c.worker_pool.size, 4);
        assert_eq!(c.log.ring_size, 1000);
        assert!(c.hot_reload.enabled);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let config = FabricConfig::load(&path).unwrap();
        assert_eq!(config, FabricConfig::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = FabricConfig::default();
        config.hub.port = 7777;
        config.save(&path).unwrap();

        let loaded = FabricConfig::load(&path).unwrap();
        assert_eq!(loaded.hub.port, 7777);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        temp_env::with_var("RELAY_HUB_PORT", Some("4242"), || {
            let mut config = FabricConfig::default();
            config.apply_env_overrides();
            assert_eq!(config.hub.port, 4242);
        });
    }

    #[test]
    fn diff_flags_hub_address_change_as_restart_required() {
        let old = FabricConfig::default();
        let mut new = old.clone();
        new.hub.port = 1234;
        let changes = diff(&old, &new);
        assert!(requires_restart(&changes));
    }

    #[test]
    fn diff_flags_heartbeat_interval_change_as_live_safe() {
        let old = FabricConfig::default();
        let mut new = old.clone();
        new.heartbeat.interval_s = 15;
        let changes = diff(&old, &new);
        assert!(!requires_restart(&changes));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::LiveSafe);
    }

    #[test]
    fn diff_of_identical_configs_is_empty() {
        let c = FabricConfig::default();
        assert!(diff(&c, &c).is_empty());
    }
}
