//! relay-watchdog — sibling process that respawns a crashed or
//! restart-requested endpoint, preserving its original argument vector.

use clap::Parser;
use relay_watchdog::{supervise, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay-watchdog")]
#[command(about = "Supervises and respawns a relay-agent endpoint process")]
#[command(version)]
struct Cli {
    /// Path to the sentinel file the endpoint writes before a requested exit
    #[arg(long, default_value = "relay-agent.restart")]
    sentinel: PathBuf,

    /// Maximum respawns allowed within the rate-limit window
    #[arg(long, default_value_t = 5)]
    max_respawns: usize,

    /// Rate-limit window, in seconds
    #[arg(long, default_value_t = 60)]
    window_s: u64,

    /// The endpoint binary to supervise
    program: PathBuf,

    /// Arguments to pass through to the endpoint on every (re)spawn
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relay_watchdog=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SupervisorConfig {
        program: cli.program,
        args: cli.args,
        sentinel_path: cli.sentinel,
        max_respawns: cli.max_respawns,
        respawn_window: Duration::from_secs(cli.window_s),
    };

    supervise(config).await?;
    Ok(())
}
