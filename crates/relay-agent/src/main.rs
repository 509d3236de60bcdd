//! relay-agent — the Relayfabric endpoint agent: connects to a hub, serves
//! its command surface, and keeps itself alive across disconnects and
//! restarts.

use clap::{Parser, Subcommand};
use relay_agent::client::EndpointClient;
use relay_agent::reconnect::ReconnectState;
use relay_agent::watchdog::RestartHandler;
use relay_agent::AgentState;
use relay_config::FabricConfig;
use relay_observe::{LogRing, RingLayer, SizeRotatingWriter};
use relay_reload::ReloadManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-agent")]
#[command(about = "Relayfabric endpoint agent")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a hub and serve the endpoint command surface
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/relayfabric/agent.json")]
        config: PathBuf,

        /// Directory of module manifests (C11.1)
        #[arg(long)]
        modules: Option<PathBuf>,

        /// Directory for local state (module ownership map, sentinel file)
        #[arg(long, default_value = "/var/lib/relayfabric/agent")]
        state_dir: PathBuf,
    },

    /// Write a default config file
    InitConfig {
        #[arg(short, long, default_value = "/etc/relayfabric/agent.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, modules, state_dir } => run_agent(config, modules, state_dir).await?,
        Commands::InitConfig { output } => init_config(output)?,
    }

    Ok(())
}

async fn run_agent(config_path: PathBuf, module_dir: Option<PathBuf>, state_dir: PathBuf) -> anyhow::Result<()> {
    let config = FabricConfig::load(&config_path)?;

    let logs = Arc::new(LogRing::new(config.log.ring_size));
    let file_writer = SizeRotatingWriter::new(
        PathBuf::from(&config.log.dir).join("agent.log"),
        config.log.max_bytes,
        config.log.backups,
    )?;

    let (filter_layer, log_reload_handle) =
        tracing_subscriber::reload::Layer::new(EnvFilter::from_default_env().add_directive("relay_agent=info".parse()?));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(file_writer))
        .with(RingLayer::new(logs.clone()))
        .init();

    info!(config = %config_path.display(), "starting relay-agent");

    let reload = Arc::new(ReloadManager::start(
        module_dir.as_deref(),
        Some(&config_path),
        Duration::from_millis(config.hot_reload.debounce_ms),
        config.clone(),
    )?);

    let state = AgentState::new(reload.clone(), logs, module_dir, state_dir.clone(), log_reload_handle);

    let argv0 = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("relay-agent"));
    let args: Vec<String> = std::env::args().skip(1).collect();
    let sentinel_path = state_dir.join("relay-agent.restart");
    state.registry.register(
        "restart_client",
        Arc::new(RestartHandler::new(sentinel_path, argv0, args)),
    );

    if config.hot_reload.enabled {
        let module_loader = state.module_loader.clone();
        let mut rx = reload.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    relay_reload::ReloadEvent::ModulesChanged(_) => {
                        if let Err(e) = module_loader.reload() {
                            tracing::warn!(error = %e, "module hot reload failed");
                        }
                    }
                    relay_reload::ReloadEvent::ConfigChanged { changes, .. } => {
                        if relay_config::requires_restart(&changes) {
                            tracing::warn!("config change requires an agent restart to take effect");
                        } else {
                            // Live-safe fields (heartbeat.interval_s,
                            // health.sample_interval_s) aren't mutated here:
                            // the heartbeat task and health sampler below
                            // both re-read `reload.current_config()` on
                            // every cycle, so they pick up the change on
                            // their next tick without any action needed here.
                            tracing::info!(count = changes.len(), "live-safe config change will apply on next read");
                        }
                    }
                }
            }
        });
    }

    let health_sampler = state.health.clone();
    let health_reload = reload.clone();
    tokio::spawn(async move {
        loop {
            let interval = Duration::from_secs(health_reload.current_config().health.sample_interval_s.max(1));
            tokio::time::sleep(interval).await;
            health_sampler.sample();
        }
    });

    let client = EndpointClient::new(
        config.endpoint.identity.clone(),
        state.registry.list(),
        state.scheduler.clone(),
        reload.clone(),
    );
    let mut reconnect = ReconnectState::new(&config.reconnect);

    client.run(&config.endpoint.hub_url, &mut reconnect).await
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    FabricConfig::default().save(&output)?;
    println!("wrote default config to {}", output.display());
    Ok(())
}
