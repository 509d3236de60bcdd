//! Hub router (C8) — forwards commands to a named endpoint or broadcasts to
//! all endpoints, correlating responses by envelope id.

use crate::session::SessionRegistry;
use parking_lot::Mutex;
use relay_proto::{codes, CommandPayload, Envelope, ErrorInfo, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("target did not respond within {0:?}")]
    Timeout(Duration),
    #[error("target disconnected before responding")]
    Disconnected,
}

/// Slack added on top of a forwarded command's own timeout before the hub
/// gives up and synthesizes a `TIMEOUT` response, so a response landing
/// just after the endpoint's own deadline still reaches the admin caller.
const HUB_GRACE: Duration = Duration::from_secs(2);

/// Table of in-flight forwarded commands awaiting a response, keyed by the
/// envelope id the hub assigned when forwarding.
#[derive(Clone, Default)]
pub struct PendingCommands {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: String) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Resolve a pending command by id, as done when a `response` envelope
    /// arrives from an endpoint. No-op if the id is unknown (already timed
    /// out, or not ours).
    pub fn resolve(&self, id: &str, response: Response) {
        if let Some(tx) = self.inner.lock().remove(id) {
            let _ = tx.send(response);
        }
    }

    fn cancel(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    /// Drop every pending command destined for `identity`, resolving each
    /// with the given error code/message — used on peer disconnect or
    /// staleness eviction, which are distinguished by `code`.
    pub fn fail_all_for(&self, identity: &str, targets: &HashMap<String, String>, code: &str, message: &str) {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = targets
            .iter()
            .filter(|(_, t)| t.as_str() == identity)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(tx) = inner.remove(&id) {
                let err = ErrorInfo::new(code, message);
                let _ = tx.send(Response::error("forward_command", err, 0.0));
            }
        }
    }
}

/// Routes commands between the hub and its connected endpoints.
pub struct Router {
    sessions: SessionRegistry,
    pending: PendingCommands,
    /// Maps in-flight envelope id -> destination identity, so a disconnect
    /// can fail only the commands addressed to that peer.
    in_flight_targets: Arc<Mutex<HashMap<String, String>>>,
}

impl Router {
    pub fn new(sessions: SessionRegistry, pending: PendingCommands) -> Self {
        Self {
            sessions,
            pending,
            in_flight_targets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forward a command to `target_identity` and wait for its response
    /// (or `timeout`, or the target disconnecting first).
    pub async fn forward(
        &self,
        target_identity: &str,
        command: String,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<Response, RouteError> {
        let outbox = self
            .sessions
            .outbox(target_identity)
            .ok_or_else(|| RouteError::UnknownTarget(target_identity.to_string()))?;

        let id = Uuid::new_v4().to_string();
        self.in_flight_targets
            .lock()
            .insert(id.clone(), target_identity.to_string());
        let rx = self.pending.insert(id.clone());

        let envelope = Envelope::command(
            id.clone(),
            CommandPayload {
                command,
                params,
                timeout_s: Some(timeout.as_secs_f64()),
            },
        );

        if outbox.send(envelope).await.is_err() {
            self.pending.cancel(&id);
            self.in_flight_targets.lock().remove(&id);
            return Err(RouteError::Disconnected);
        }

        let result = tokio::time::timeout(timeout + HUB_GRACE, rx).await;
        self.in_flight_targets.lock().remove(&id);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RouteError::Disconnected),
            Err(_) => {
                self.pending.cancel(&id);
                warn!(target = target_identity, id, "forwarded command timed out");
                Err(RouteError::Timeout(timeout))
            }
        }
    }

    /// Fan a command out to every connected endpoint, collecting whichever
    /// responses arrive within `timeout` (best-effort; slow/disconnected
    /// endpoints are simply absent from the result map).
    pub async fn broadcast(
        &self,
        command: String,
        params: serde_json::Value,
        timeout: Duration,
    ) -> HashMap<String, Response> {
        use crate::session::PeerRole;

        let targets: Vec<String> = self
            .sessions
            .list()
            .into_iter()
            .filter(|p| p.role == PeerRole::Endpoint)
            .map(|p| p.identity)
            .collect();

        let mut results = HashMap::new();
        for identity in targets {
            match self.forward(&identity, command.clone(), params.clone(), timeout).await {
                Ok(response) => {
                    results.insert(identity, response);
                }
                Err(e) => {
                    warn!(identity, error = %e, "broadcast leg failed");
                }
            }
        }
        results
    }

    /// Notify the router that `identity` disconnected so its in-flight
    /// forwards fail fast instead of waiting out their timeout.
    pub fn on_disconnect(&self, identity: &str) {
        self.on_disconnect_with_code(identity, codes::DISCONNECT, "target disconnected");
    }

    /// Like [`Router::on_disconnect`] but with an explicit error code —
    /// used by the stale-heartbeat sweep to fail in-flight commands with
    /// `STALE_ENDPOINT` instead of `DISCONNECT`.
    pub fn on_disconnect_with_code(&self, identity: &str, code: &str, message: &str) {
        let targets = self.in_flight_targets.lock().clone();
        self.pending.fail_all_for(identity, &targets, code, message);
    }

    /// Resolve a pending forward by the hub-assigned envelope id, as done
    /// when a `response` envelope arrives back from an endpoint.
    pub fn resolve_response(&self, id: &str, response: Response) {
        self.pending.resolve(id, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PeerRole;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn router_with_endpoint(identity: &str) -> (Router, mpsc::Receiver<Envelope>) {
        let sessions = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(8);
        let (kill_tx, _kill_rx) = oneshot::channel();
        sessions.register(identity.to_string(), PeerRole::Endpoint, vec![], tx, kill_tx);
        let router = Router::new(sessions, PendingCommands::new());
        (router, rx)
    }

    #[tokio::test]
    async fn forward_to_unknown_target_errors_immediately() {
        let sessions = SessionRegistry::new();
        let router = Router::new(sessions, PendingCommands::new());
        let err = router
            .forward("ghost", "ping".to_string(), json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn forward_times_out_when_target_never_responds() {
        let (router, mut rx) = router_with_endpoint("quiet");
        let handle = tokio::spawn(async move { rx.recv().await });

        let err = router
            .forward("quiet", "ping".to_string(), json!({}), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Timeout(_)));
        handle.abort();
    }

    #[tokio::test]
    async fn forward_resolves_when_response_is_posted() {
        let (router, mut rx) = router_with_endpoint("fast");
        let pending = PendingCommands::new();
        let router = Router::new(router_sessions(&router), pending.clone());

        let forward_handle = tokio::spawn(async move {
            router.forward("fast", "ping".to_string(), json!({}), Duration::from_secs(1)).await
        });

        let sent = rx.recv().await.expect("command sent to endpoint");
        pending.resolve(sent.id(), Response::success("ping", json!("pong"), 0.001));

        let response = forward_handle.await.unwrap().unwrap();
        assert!(response.success);
    }

    fn router_sessions(router: &Router) -> SessionRegistry {
        router.sessions.clone()
    }
}
