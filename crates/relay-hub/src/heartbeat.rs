//! Hub-side heartbeat monitor (C6) — evicts endpoints that stop sending
//! heartbeats within `interval_s * stale_multiplier`.

use crate::router::Router;
use crate::session::SessionRegistry;
use chrono::Utc;
use relay_proto::codes;
use relay_reload::ReloadManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs forever, sweeping the session registry for stale peers every
/// `sweep_interval`. A peer is evicted once `interval_s * stale_multiplier`
/// has passed since its last heartbeat, read fresh from `reload` on every
/// sweep so a live config change to either field takes effect on the next
/// tick rather than requiring a restart. Call as a spawned task.
pub async fn run_stale_sweep(sessions: SessionRegistry, router: Arc<Router>, reload: Arc<ReloadManager>, sweep_interval: Duration) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        let heartbeat = reload.current_config().heartbeat;
        let stale_after =
            chrono::Duration::milliseconds((heartbeat.interval_s as f64 * heartbeat.stale_multiplier * 1000.0) as i64);
        let cutoff = Utc::now() - stale_after;
        for identity in sessions.stale_since(cutoff) {
            info!(identity, "evicting stale peer (no heartbeat within window)");
            sessions.remove(&identity);
            router.on_disconnect_with_code(&identity, codes::STALE_ENDPOINT, "endpoint missed its heartbeat window");
        }
    }
}
