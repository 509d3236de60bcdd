//! Hub library: session registry, command router, admin command surface,
//! plugin loader, and the axum WebSocket accept side (C6-C8, C13).

#![forbid(unsafe_code)]

pub mod admin;
pub mod heartbeat;
pub mod plugins;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;

pub use plugins::{PluginError, PluginLoader, PluginManifest};
pub use router::{PendingCommands, RouteError, Router};
pub use session::{PeerRecord, PeerRole, SessionRegistry};
pub use state::AppState;

use axum::extract::State;
use axum::routing::get;
use axum::Router as AxumRouter;
use relay_observe::MetricsExporter;
use tower_http::trace::TraceLayer;

/// Build the hub's axum router: a single `/ws` endpoint for both endpoint
/// and admin peers (role is declared in the `register` envelope, not the
/// URL), per spec.md's single-socket-per-peer design, plus `/healthz` and
/// `/metrics` for external monitoring.
pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(ws::handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> String {
    MetricsExporter::new(&state.metrics).render()
}
