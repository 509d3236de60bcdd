//! Health monitor (C9) — periodic local process sampling with a bounded
//! history ring, feeding the `health_status` endpoint command.
//!
//! The ring-buffer-with-eviction shape mirrors the teacher's fleet metrics
//! time series; the thresholds here are about a single process's own
//! resource use and command failure rate, not a remote instance's.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use sysinfo::System;

/// One sample of local process/host resource use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_pct: f64,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub uptime_s: u64,
    pub sampled_at: DateTime<Utc>,
}

impl HealthSample {
    pub fn mem_pct(&self) -> f64 {
        if self.mem_total_bytes == 0 {
            return 0.0;
        }
        (self.mem_used_bytes as f64 / self.mem_total_bytes as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
    pub uptime_s: u64,
    pub recent_failure_rate: f64,
    pub sample_count: usize,
    pub sampled_at: DateTime<Utc>,
}

/// Thresholds driving [`HealthMonitor::status`]. See SPEC_FULL.md §4.9.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// CPU EMA above this, sustained for `sustained_samples` samples, is unhealthy.
    pub cpu_ema_alert_pct: f64,
    /// Memory use above this percentage is unhealthy.
    pub mem_alert_pct: f64,
    /// Command failure rate (over the last `failure_window` commands) above
    /// this is unhealthy.
    pub failure_rate_alert: f64,
    /// Consecutive over-threshold CPU samples required before declaring
    /// unhealthy rather than merely degraded.
    pub sustained_samples: u32,
    /// Number of recent command outcomes considered for failure rate.
    pub failure_window: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_ema_alert_pct: 90.0,
            mem_alert_pct: 90.0,
            failure_rate_alert: 0.5,
            sustained_samples: 3,
            failure_window: 20,
        }
    }
}

struct State {
    samples: VecDeque<HealthSample>,
    outcomes: VecDeque<bool>,
    cpu_ema: f64,
    consecutive_cpu_alerts: u32,
}

/// Samples local resource use on demand and keeps a bounded history.
pub struct HealthMonitor {
    state: RwLock<State>,
    capacity: usize,
    thresholds: HealthThresholds,
    system: RwLock<System>,
}

impl HealthMonitor {
    pub fn new(capacity: usize, thresholds: HealthThresholds) -> Self {
        Self {
            state: RwLock::new(State {
                samples: VecDeque::with_capacity(capacity),
                outcomes: VecDeque::with_capacity(thresholds.failure_window),
                cpu_ema: 0.0,
                consecutive_cpu_alerts: 0,
            }),
            capacity,
            thresholds,
            system: RwLock::new(System::new_all()),
        }
    }

    /// Take a fresh sample of CPU/memory/uptime and push it into the ring.
    pub fn sample(&self) -> HealthSample {
        let mut system = self.system.write();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_pct = if system.cpus().is_empty() {
            0.0
        } else {
            system.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>()
                / system.cpus().len() as f64
        };

        let sample = HealthSample {
            cpu_pct,
            mem_used_bytes: system.used_memory(),
            mem_total_bytes: system.total_memory(),
            uptime_s: System::uptime(),
            sampled_at: Utc::now(),
        };

        self.push(sample);
        sample
    }

    fn push(&self, sample: HealthSample) {
        let mut state = self.state.write();

        // Exponential moving average, alpha=0.3 — same smoothing weight the
        // teacher used for its health-score deductions.
        state.cpu_ema = if state.samples.is_empty() {
            sample.cpu_pct
        } else {
            0.3 * sample.cpu_pct + 0.7 * state.cpu_ema
        };

        if sample.cpu_pct > self.thresholds.cpu_ema_alert_pct {
            state.consecutive_cpu_alerts += 1;
        } else {
            state.consecutive_cpu_alerts = 0;
        }

        if state.samples.len() == self.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Record the outcome of a dispatched command for failure-rate tracking.
    pub fn record_command_outcome(&self, success: bool) {
        let mut state = self.state.write();
        if state.outcomes.len() == self.thresholds.failure_window {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(success);
    }

    fn failure_rate(state: &State) -> f64 {
        if state.outcomes.is_empty() {
            return 0.0;
        }
        let failures = state.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / state.outcomes.len() as f64
    }

    /// Compute the current status and a full report from the latest sample.
    pub fn report(&self) -> HealthReport {
        let state = self.state.read();
        let latest = state.samples.back().copied().unwrap_or(HealthSample {
            cpu_pct: 0.0,
            mem_used_bytes: 0,
            mem_total_bytes: 0,
            uptime_s: 0,
            sampled_at: Utc::now(),
        });
        let failure_rate = Self::failure_rate(&state);

        let cpu_unhealthy = state.cpu_ema > self.thresholds.cpu_ema_alert_pct
            && state.consecutive_cpu_alerts >= self.thresholds.sustained_samples;
        let mem_unhealthy = latest.mem_pct() > self.thresholds.mem_alert_pct;
        let failure_unhealthy = failure_rate > self.thresholds.failure_rate_alert;

        let status = if cpu_unhealthy || mem_unhealthy || failure_unhealthy {
            HealthStatus::Unhealthy
        } else if state.cpu_ema > self.thresholds.cpu_ema_alert_pct * 0.8
            || latest.mem_pct() > self.thresholds.mem_alert_pct * 0.8
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            cpu_pct: state.cpu_ema,
            mem_pct: latest.mem_pct(),
            mem_used_bytes: latest.mem_used_bytes,
            mem_total_bytes: latest.mem_total_bytes,
            uptime_s: latest.uptime_s,
            recent_failure_rate: failure_rate,
            sample_count: state.samples.len(),
            sampled_at: latest.sampled_at,
        }
    }

    pub fn history(&self) -> Vec<HealthSample> {
        self.state.read().samples.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(capacity: usize) -> HealthMonitor {
        HealthMonitor::new(capacity, HealthThresholds::default())
    }

    fn push_sample(monitor: &HealthMonitor, cpu_pct: f64, mem_used: u64, mem_total: u64) {
        monitor.push(HealthSample {
            cpu_pct,
            mem_used_bytes: mem_used,
            mem_total_bytes: mem_total,
            uptime_s: 100,
            sampled_at: Utc::now(),
        });
    }

    #[test]
    fn no_samples_reports_healthy_with_zero_counts() {
        let monitor = monitor_with(10);
        let report = monitor.report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.sample_count, 0);
    }

    #[test]
    fn ring_evicts_oldest_sample_past_capacity() {
        let monitor = monitor_with(3);
        for i in 0..5 {
            push_sample(&monitor, i as f64, 0, 100);
        }
        assert_eq!(monitor.history().len(), 3);
    }

    #[test]
    fn sustained_high_cpu_marks_unhealthy() {
        let monitor = monitor_with(10);
        for _ in 0..3 {
            push_sample(&monitor, 95.0, 10, 100);
        }
        assert_eq!(monitor.report().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn single_cpu_spike_is_not_yet_unhealthy() {
        let monitor = monitor_with(10);
        push_sample(&monitor, 95.0, 10, 100);
        assert_ne!(monitor.report().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn high_memory_marks_unhealthy_regardless_of_cpu() {
        let monitor = monitor_with(10);
        push_sample(&monitor, 1.0, 95, 100);
        assert_eq!(monitor.report().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn high_failure_rate_marks_unhealthy() {
        let monitor = monitor_with(10);
        push_sample(&monitor, 1.0, 1, 100);
        for _ in 0..11 {
            monitor.record_command_outcome(false);
        }
        for _ in 0..9 {
            monitor.record_command_outcome(true);
        }
        assert_eq!(monitor.report().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn failure_window_only_considers_recent_outcomes() {
        let monitor = monitor_with(10);
        for _ in 0..20 {
            monitor.record_command_outcome(false);
        }
        // now flip to all successes; window size is 20, so old failures age out
        for _ in 0..20 {
            monitor.record_command_outcome(true);
        }
        push_sample(&monitor, 1.0, 1, 100);
        assert_eq!(monitor.report().recent_failure_rate, 0.0);
    }
}
