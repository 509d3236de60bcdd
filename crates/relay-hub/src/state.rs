//! Shared hub state, threaded through every axum handler via `State`.

use crate::plugins::PluginLoader;
use crate::router::{PendingCommands, Router};
use crate::session::SessionRegistry;
use relay_config::FabricConfig;
use relay_observe::{LogRing, OperationsMetrics};
use relay_reload::ReloadManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub router: Arc<Router>,
    pub metrics: Arc<OperationsMetrics>,
    pub logs: Arc<LogRing>,
    pub reload: Arc<ReloadManager>,
    pub plugins: PluginLoader,
}

impl AppState {
    pub fn new(reload: Arc<ReloadManager>, logs: Arc<LogRing>, plugins: PluginLoader) -> Self {
        let sessions = SessionRegistry::new();
        let router = Arc::new(Router::new(sessions.clone(), PendingCommands::new()));
        Self {
            sessions,
            router,
            metrics: Arc::new(OperationsMetrics::new()),
            logs,
            reload,
            plugins,
        }
    }

    pub fn config(&self) -> FabricConfig {
        self.reload.current_config()
    }
}
