//! Reconnect engine (C5) — exponential backoff with jitter between dial
//! attempts, reset to the initial delay on a successful register/ack.
//!
//! Takes `now`/rng as explicit parameters rather than calling real
//! randomness internally, matching `relay_watchdog::RespawnLimiter`'s
//! injected-clock shape so the schedule is unit-testable.

use rand::Rng;
use relay_config::ReconnectSection;
use std::time::Duration;

/// Tracks the current backoff delay and attempt count across reconnect
/// cycles.
pub struct ReconnectState {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    current: Duration,
    attempt_count: u64,
}

impl ReconnectState {
    pub fn new(section: &ReconnectSection) -> Self {
        let initial = Duration::from_secs(section.initial_s);
        Self {
            initial,
            max: Duration::from_secs(section.max_s),
            multiplier: section.multiplier,
            jitter: section.jitter,
            current: initial,
            attempt_count: 0,
        }
    }

    pub fn attempt_count(&self) -> u64 {
        self.attempt_count
    }

    /// Reset the backoff to its initial delay, as done once registration
    /// succeeds and an `ack` is received.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt_count = 0;
    }

    /// Compute the next delay, advance the internal backoff state, and
    /// increment the attempt count. `rng` supplies the jitter fraction in
    /// `[-1.0, 1.0]`.
    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        self.attempt_count += 1;
        let base = self.current;

        let jitter_fraction: f64 = rng.gen_range(-1.0..=1.0) * self.jitter;
        let jittered_secs = (base.as_secs_f64() * (1.0 + jitter_fraction)).max(0.0);

        let advanced = Duration::from_secs_f64(base.as_secs_f64() * self.multiplier).min(self.max);
        self.current = advanced;

        Duration::from_secs_f64(jittered_secs)
    }
}
