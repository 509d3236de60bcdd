//! Watchdog protocol (C12) — supervises a sibling endpoint process, telling
//! a clean restart request (sentinel file present) from a crash, and
//! respawning with the original argument vector in either case, subject to
//! a respawn rate limit.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait on child: {0}")]
    Wait(std::io::Error),
}

/// What to run and how to find the endpoint's restart-requested sentinel.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub sentinel_path: PathBuf,
    pub max_respawns: usize,
    pub respawn_window: Duration,
}

impl SupervisorConfig {
    pub fn new(program: PathBuf, args: Vec<String>, sentinel_path: PathBuf) -> Self {
        Self {
            program,
            args,
            sentinel_path,
            max_respawns: 5,
            respawn_window: Duration::from_secs(60),
        }
    }
}

/// Why the supervised process most recently exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The sentinel file was present: a clean, requested restart.
    Requested,
    /// No sentinel: treated as a crash.
    Crashed,
}

/// Tracks respawn timestamps in a sliding window, refusing once the window
/// holds `max` entries (spec.md §4.12: no more than 5 within 60s).
pub struct RespawnLimiter {
    timestamps: VecDeque<Instant>,
    max: usize,
    window: Duration,
}

impl RespawnLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            max,
            window,
        }
    }

    /// Record a respawn attempt now and report whether it's within budget.
    /// Always records, even when refusing, so a caller that ignores the
    /// refusal and respawns anyway still counts against the window.
    pub fn record_and_check(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        let allowed = self.timestamps.len() < self.max;
        self.timestamps.push_back(now);
        allowed
    }
}

/// Check the sentinel file, consuming it (deleting it) if present.
fn consume_sentinel(path: &PathBuf) -> ExitReason {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove sentinel file");
        }
        ExitReason::Requested
    } else {
        ExitReason::Crashed
    }
}

/// Spawn `config.program` and supervise it forever: on exit, classify the
/// reason via the sentinel file, enforce the respawn rate limit, and
/// respawn with the same argument vector. Returns once the rate limit is
/// exceeded (the caller should treat this as a fatal startup failure).
pub async fn supervise(config: SupervisorConfig) -> Result<(), WatchdogError> {
    let mut limiter = RespawnLimiter::new(config.max_respawns, config.respawn_window);

    loop {
        info!(program = %config.program.display(), args = ?config.args, "spawning supervised process");
        let status = Command::new(&config.program)
            .args(&config.args)
            .status()
            .await
            .map_err(|e| WatchdogError::Spawn {
                program: config.program.display().to_string(),
                source: e,
            })?;

        let reason = consume_sentinel(&config.sentinel_path);
        info!(?reason, code = ?status.code(), "supervised process exited");

        if !limiter.record_and_check(Instant::now()) {
            error!(
                max = config.max_respawns,
                window_s = config.respawn_window.as_secs(),
                "respawn rate limit exceeded, giving up"
            );
            return Ok(());
        }
    }
}
