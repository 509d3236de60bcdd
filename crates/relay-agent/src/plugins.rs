//! Module reload axis (C11.1) — declarative JSON manifests loaded from a
//! directory, each describing a shell-command handler.
//!
//! The workspace forbids `unsafe_code`, which rules out dylib-based dynamic
//! module loading the way spec.md's original "re-import module, enumerate
//! handler-decorated callables" language assumes. Per spec.md §9's own
//! re-architecture guidance ("replace with an explicit plugin boundary:
//! each plugin exports a list of (name, callable, kind, default_timeout)
//! tuples; reload is discard previous, load new, atomically swap registry
//! entries"), a manifest plays the role of that tuple and a
//! [`relay_registry::Handler`] wrapping `tokio::process::Command` plays the
//! role of the callable. Mirrors `relay_hub::plugins::PluginLoader`'s shape.

use async_trait::async_trait;
use relay_persist::JsonStore;
use relay_registry::{Handler, HandlerError, HandlerKind, Registry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kind: ManifestKind,
    #[serde(default)]
    pub default_timeout_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    #[default]
    Cooperative,
    Blocking,
}

impl From<ManifestKind> for HandlerKind {
    fn from(kind: ManifestKind) -> Self {
        match kind {
            ManifestKind::Cooperative => HandlerKind::Cooperative,
            ManifestKind::Blocking => HandlerKind::Blocking,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("read module dir {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("read manifest {0}: {1}")]
    ReadManifest(String, std::io::Error),
    #[error("parse manifest {0}: {1}")]
    ParseManifest(String, serde_json::Error),
}

/// A handler that runs a manifest's program as a child process, passing its
/// `params` JSON on stdin and parsing stdout as the result's `data`.
struct ShellHandler {
    program: String,
    args: Vec<String>,
    kind: HandlerKind,
    default_timeout: Option<Duration>,
}

#[async_trait]
impl Handler for ShellHandler {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        let input = serde_json::to_vec(&params).map_err(|e| HandlerError::InvalidParams(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| HandlerError::Failed(format!("spawn {}: {e}", self.program)))?;

        {
            use tokio::io::AsyncWriteExt;
            let stdin = child.stdin.as_mut().ok_or_else(|| HandlerError::Failed("no stdin".to_string()))?;
            stdin.write_all(&input).await.map_err(|e| HandlerError::Failed(e.to_string()))?;
        }

        let output = child.wait_with_output().await.map_err(|e| HandlerError::Failed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(HandlerError::Failed(format!("{} exited with {}: {stderr}", self.program, output.status)));
        }

        if output.stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout).map_err(|e| HandlerError::Failed(format!("non-JSON stdout: {e}")))
    }

    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

/// Loads manifests from a directory, registering one [`ShellHandler`] per
/// manifest and tracking which handler names came from which manifest file
/// (so a reload can deregister names whose manifest disappeared) in a
/// [`JsonStore`]-backed ownership map.
pub struct ModuleLoader {
    dir: Option<PathBuf>,
    registry: Registry,
    ownership: JsonStore,
}

impl ModuleLoader {
    pub fn new(dir: Option<PathBuf>, registry: Registry, state_path: &Path) -> Self {
        Self {
            dir,
            registry,
            ownership: JsonStore::new(state_path, "module_ownership"),
        }
    }

    /// (Re)load every `*.json` manifest, registering its handler and
    /// deregistering any previously-owned name no longer present. A missing
    /// directory yields zero loaded modules rather than an error — the
    /// module axis is optional.
    pub fn reload(&self) -> Result<usize, ModuleError> {
        let previous: HashMap<String, String> = self.ownership.load();

        let Some(dir) = &self.dir else {
            self.deregister_all(&previous);
            let _ = self.ownership.save(&HashMap::<String, String>::new());
            return Ok(0);
        };
        if !dir.exists() {
            self.deregister_all(&previous);
            let _ = self.ownership.save(&HashMap::<String, String>::new());
            return Ok(0);
        }

        let entries = std::fs::read_dir(dir).map_err(|e| ModuleError::ReadDir(dir.display().to_string(), e))?;

        let mut current: HashMap<String, String> = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_manifest(&path) {
                Ok(manifest) => {
                    let file_name = path.display().to_string();
                    let handler = ShellHandler {
                        program: manifest.program.clone(),
                        args: manifest.args.clone(),
                        kind: manifest.kind.into(),
                        default_timeout: manifest.default_timeout_s.map(Duration::from_secs_f64),
                    };
                    self.registry.register(manifest.name.clone(), std::sync::Arc::new(handler));
                    info!(module = %manifest.name, path = %file_name, "module handler loaded");
                    current.insert(manifest.name, file_name);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid module manifest"),
            }
        }

        for (name, _) in previous.iter().filter(|(name, _)| !current.contains_key(*name)) {
            self.registry.deregister(name);
            info!(module = name, "deregistered handler whose manifest disappeared");
        }

        let count = current.len();
        let _ = self.ownership.save(&current);
        Ok(count)
    }

    fn deregister_all(&self, owned: &HashMap<String, String>) {
        for name in owned.keys() {
            self.registry.deregister(name);
        }
    }
}

fn load_manifest(path: &Path) -> Result<ModuleManifest, ModuleError> {
    let display = path.display().to_string();
    let data = std::fs::read_to_string(path).map_err(|e| ModuleError::ReadManifest(display.clone(), e))?;
    serde_json::from_str(&data).map_err(|e| ModuleError::ParseManifest(display, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_manifest(dir: &Path, file: &str, manifest: &ModuleManifest) {
        std::fs::write(dir.join(file), serde_json::to_string(manifest).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn missing_module_dir_reloads_to_empty() {
        let state = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(
            Some(PathBuf::from("/nonexistent/path/for/modules")),
            Registry::new(),
            state.path(),
        );
        assert_eq!(loader.reload().unwrap(), 0);
    }

    #[tokio::test]
    async fn reload_registers_a_shell_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "echo.json",
            &ModuleManifest {
                name: "shell_echo".to_string(),
                program: "cat".to_string(),
                args: vec![],
                kind: ManifestKind::Cooperative,
                default_timeout_s: None,
            },
        );

        let registry = Registry::new();
        let loader = ModuleLoader::new(Some(dir.path().to_path_buf()), registry.clone(), state.path());
        assert_eq!(loader.reload().unwrap(), 1);
        assert!(registry.lookup("shell_echo").is_some());

        let handler = registry.lookup("shell_echo").unwrap();
        let result = handler.invoke(json!({"hello": "world"})).await.unwrap();
        assert_eq!(result, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn removing_a_manifest_deregisters_its_handler_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "echo.json",
            &ModuleManifest {
                name: "shell_echo".to_string(),
                program: "cat".to_string(),
                args: vec![],
                kind: ManifestKind::Cooperative,
                default_timeout_s: None,
            },
        );

        let registry = Registry::new();
        let loader = ModuleLoader::new(Some(dir.path().to_path_buf()), registry.clone(), state.path());
        loader.reload().unwrap();
        assert!(registry.lookup("shell_echo").is_some());

        std::fs::remove_file(dir.path().join("echo.json")).unwrap();
        loader.reload().unwrap();
        assert!(registry.lookup("shell_echo").is_none());
    }

    #[tokio::test]
    async fn invalid_manifest_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();

        let loader = ModuleLoader::new(Some(dir.path().to_path_buf()), Registry::new(), state.path());
        assert_eq!(loader.reload().unwrap(), 0);
    }
}
