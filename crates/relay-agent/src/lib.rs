//! relay-agent — the Relayfabric endpoint: a cooperative command scheduler
//! (C4), reconnect engine (C5), heartbeat sender (C6), and the reliability
//! services (C9-C12) that sit behind the endpoint's command surface.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod handlers;
pub mod plugins;
pub mod reconnect;
pub mod scheduler;
pub mod watchdog;

use handlers::{GetLogStatsHandler, GetLogsHandler, HealthStatusHandler, HotReloadHandler, ListHandlersHandler, SetLogLevelHandler};
use plugins::ModuleLoader;
use relay_config::FabricConfig;
use relay_health::HealthMonitor;
use relay_observe::{LogRing, OperationsMetrics};
use relay_registry::Registry;
use relay_reload::ReloadManager;
use scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{reload::Handle, EnvFilter, Registry as TracingRegistry};

/// Everything the endpoint's built-in handlers and main loop share.
pub struct AgentState {
    pub registry: Registry,
    pub health: Arc<HealthMonitor>,
    pub logs: Arc<LogRing>,
    pub metrics: Arc<OperationsMetrics>,
    pub reload: Arc<ReloadManager>,
    pub module_loader: Arc<ModuleLoader>,
    pub scheduler: Arc<Scheduler>,
}

impl AgentState {
    /// Assemble the endpoint's state and register every built-in command
    /// handler (spec.md §6.4). `log_reload_handle` is the `EnvFilter`
    /// reload handle installed when `tracing_subscriber` was initialized,
    /// letting `set_log_level` take effect without a restart.
    pub fn new(
        reload: Arc<ReloadManager>,
        logs: Arc<LogRing>,
        module_dir: Option<PathBuf>,
        state_path: PathBuf,
        log_reload_handle: Handle<EnvFilter, TracingRegistry>,
    ) -> Self {
        let config = reload.current_config();
        let registry = Registry::new();
        let health = Arc::new(HealthMonitor::new(720, relay_health::HealthThresholds::default()));
        let metrics = Arc::new(OperationsMetrics::new());
        let module_loader = Arc::new(ModuleLoader::new(module_dir, registry.clone(), &state_path));

        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            config.worker_pool.size,
            Duration::from_secs(config.command.default_timeout_s),
            metrics.clone(),
            health.clone(),
        ));

        registry.register("health_status", Arc::new(HealthStatusHandler { health: health.clone() }));
        registry.register("get_logs", Arc::new(GetLogsHandler { logs: logs.clone() }));
        registry.register("get_log_stats", Arc::new(GetLogStatsHandler { logs: logs.clone() }));
        registry.register("set_log_level", Arc::new(SetLogLevelHandler { reload_handle: log_reload_handle }));
        registry.register(
            "hot_reload",
            Arc::new(HotReloadHandler { reload: reload.clone(), module_loader: module_loader.clone() }),
        );
        registry.register("list_handlers", Arc::new(ListHandlersHandler { registry: registry.clone() }));

        if let Err(e) = module_loader.reload() {
            tracing::warn!(error = %e, "initial module load failed");
        }

        Self {
            registry,
            health,
            logs,
            metrics,
            reload,
            module_loader,
            scheduler,
        }
    }

    pub fn config(&self) -> FabricConfig {
        self.reload.current_config()
    }
}
