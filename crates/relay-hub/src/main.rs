//! relay-hub — session registry, command router, and admin surface for the
//! Relayfabric remote-control system.

use clap::{Parser, Subcommand};
use relay_config::FabricConfig;
use relay_hub::{build_router, heartbeat, AppState, PluginLoader};
use relay_observe::{LogRing, RingLayer, SizeRotatingWriter};
use relay_reload::ReloadManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relay-hub")]
#[command(about = "Relayfabric hub: session registry, router, and admin surface")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/relayfabric/hub.json")]
        config: PathBuf,

        /// Directory of plugin manifests (C13)
        #[arg(long)]
        plugins: Option<PathBuf>,
    },

    /// Write a default config file
    InitConfig {
        #[arg(short, long, default_value = "/etc/relayfabric/hub.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, plugins } => run_hub(config, plugins).await?,
        Commands::InitConfig { output } => init_config(output)?,
    }

    Ok(())
}

async fn run_hub(config_path: PathBuf, plugin_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = FabricConfig::load(&config_path)?;

    let logs = Arc::new(LogRing::new(config.log.ring_size));
    let file_writer = SizeRotatingWriter::new(
        PathBuf::from(&config.log.dir).join("hub.log"),
        config.log.max_bytes,
        config.log.backups,
    )?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(file_writer))
        .with(RingLayer::new(logs.clone()))
        .with(EnvFilter::from_default_env().add_directive("relay_hub=info".parse()?))
        .init();

    info!(config = %config_path.display(), "starting relay-hub");

    let plugins = PluginLoader::new(plugin_dir.clone());
    if let Err(e) = plugins.reload() {
        tracing::warn!(error = %e, "initial plugin load failed");
    }

    let reload = Arc::new(ReloadManager::start(
        plugin_dir.as_deref(),
        Some(&config_path),
        Duration::from_millis(config.hot_reload.debounce_ms),
        config.clone(),
    )?);

    if config.hot_reload.enabled {
        let reload_plugins = plugins.clone();
        let mut rx = reload.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    relay_reload::ReloadEvent::ModulesChanged(_) => {
                        if let Err(e) = reload_plugins.reload() {
                            tracing::warn!(error = %e, "plugin hot reload failed");
                        }
                    }
                    relay_reload::ReloadEvent::ConfigChanged { changes, .. } => {
                        if relay_config::requires_restart(&changes) {
                            tracing::warn!("config change requires a hub restart to take effect");
                        } else {
                            // Live-safe fields (e.g. heartbeat.interval_s / stale_multiplier)
                            // aren't mutated here: the stale-sweep task re-reads
                            // `reload.current_config()` on every tick, so they take
                            // effect on the next sweep without any action needed here.
                            tracing::info!(count = changes.len(), "live-safe config change will apply on next read");
                        }
                    }
                }
            }
        });
    }

    let state = AppState::new(reload, logs, plugins);

    tokio::spawn(heartbeat::run_stale_sweep(
        state.sessions.clone(),
        state.router.clone(),
        state.reload.clone(),
        Duration::from_secs(1),
    ));

    let router = build_router(state);
    let bind_addr = format!("{}:{}", config.hub.host, config.hub.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "hub listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("hub shut down gracefully");
    Ok(())
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    FabricConfig::default().save(&output)?;
    println!("wrote default config to {}", output.display());
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
