//! Plugin loader (C13) — declarative command aliases loaded from a
//! directory of JSON manifests, reloadable without a hub restart.
//!
//! A plugin does not ship code: the workspace forbids `unsafe_code`, which
//! rules out loading native dylibs. A manifest instead declares an alias
//! command name that the router resolves to a forward onto a specific
//! endpoint identity and inner command — e.g. a `"nightly_backup"` plugin
//! that always forwards to `backup-host`'s `run_backup` handler.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub target_identity: String,
    pub inner_command: String,
    #[serde(default)]
    pub inner_params: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("read plugin dir {0}: {1}")]
    ReadDir(String, std::io::Error),
    #[error("read manifest {0}: {1}")]
    ReadManifest(String, std::io::Error),
    #[error("parse manifest {0}: {1}")]
    ParseManifest(String, serde_json::Error),
}

/// Holds the currently-loaded plugin manifests, keyed by alias name.
#[derive(Clone, Default)]
pub struct PluginLoader {
    dir: Option<PathBuf>,
    plugins: Arc<RwLock<HashMap<String, PluginManifest>>>,
}

impl PluginLoader {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            plugins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// (Re)load every `*.json` manifest in the plugin directory, replacing
    /// the current table wholesale. A directory that doesn't exist yields
    /// an empty table rather than an error — plugins are optional.
    pub fn reload(&self) -> Result<usize, PluginError> {
        let Some(dir) = &self.dir else {
            self.plugins.write().clear();
            return Ok(0);
        };
        if !dir.exists() {
            self.plugins.write().clear();
            return Ok(0);
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| PluginError::ReadDir(dir.display().to_string(), e))?;

        let mut loaded = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_manifest(&path) {
                Ok(manifest) => {
                    info!(plugin = %manifest.name, path = %path.display(), "plugin loaded");
                    loaded.insert(manifest.name.clone(), manifest);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid plugin manifest"),
            }
        }

        let count = loaded.len();
        *self.plugins.write() = loaded;
        Ok(count)
    }

    pub fn resolve(&self, alias: &str) -> Option<PluginManifest> {
        self.plugins.read().get(alias).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn load_manifest(path: &Path) -> Result<PluginManifest, PluginError> {
    let display = path.display().to_string();
    let data = std::fs::read_to_string(path).map_err(|e| PluginError::ReadManifest(display.clone(), e))?;
    serde_json::from_str(&data).map_err(|e| PluginError::ParseManifest(display, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, name: &str, manifest: &PluginManifest) {
        let path = dir.join(format!("{name}.json"));
        std::fs::write(path, serde_json::to_string(manifest).unwrap()).unwrap();
    }

    #[test]
    fn missing_plugin_dir_reloads_to_empty() {
        let loader = PluginLoader::new(Some(PathBuf::from("/nonexistent/path/for/plugins")));
        assert_eq!(loader.reload().unwrap(), 0);
        assert!(loader.list().is_empty());
    }

    #[test]
    fn reload_picks_up_valid_manifests_and_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "nightly_backup",
            &PluginManifest {
                name: "nightly_backup".to_string(),
                target_identity: "backup-host".to_string(),
                inner_command: "run_backup".to_string(),
                inner_params: serde_json::json!({}),
            },
        );
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "irrelevant").unwrap();

        let loader = PluginLoader::new(Some(dir.path().to_path_buf()));
        assert_eq!(loader.reload().unwrap(), 1);
        assert_eq!(loader.list(), vec!["nightly_backup".to_string()]);

        let manifest = loader.resolve("nightly_backup").unwrap();
        assert_eq!(manifest.target_identity, "backup-host");
    }

    #[test]
    fn reload_replaces_the_table_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "a",
            &PluginManifest {
                name: "a".to_string(),
                target_identity: "x".to_string(),
                inner_command: "y".to_string(),
                inner_params: serde_json::json!({}),
            },
        );
        let loader = PluginLoader::new(Some(dir.path().to_path_buf()));
        loader.reload().unwrap();
        assert_eq!(loader.list(), vec!["a".to_string()]);

        std::fs::remove_file(dir.path().join("a.json")).unwrap();
        loader.reload().unwrap();
        assert!(loader.list().is_empty());
    }
}
