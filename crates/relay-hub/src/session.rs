//! Hub session registry (C7) — tracks connected peers in memory only.
//!
//! Never persisted: a hub restart drops all sessions and every endpoint
//! reconnects and re-registers, per the ephemeral-peer-state rule.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_proto::{codes, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// What kind of peer registered: affects which admin commands it may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Endpoint,
    Admin,
}

impl PeerRole {
    pub fn from_wire(role: &str) -> Self {
        match role {
            "admin" => PeerRole::Admin,
            _ => PeerRole::Endpoint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: u64,
    pub identity: String,
    pub role: PeerRole,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// A live connection: the record, a channel to push envelopes to its write
/// half, and a kill switch that tells its read loop to stop even if the
/// peer itself never sends another frame or closes the socket.
struct PeerHandle {
    record: PeerRecord,
    outbox: mpsc::Sender<Envelope>,
    kill: oneshot::Sender<()>,
}

/// In-memory table of connected peers, keyed by identity.
///
/// Re-registration under an identity already present evicts the previous
/// connection: it is sent an `error{code: EVICTED}` envelope and its kill
/// switch is fired, per spec.md §4.7.
#[derive(Clone)]
pub struct SessionRegistry {
    peers: Arc<RwLock<HashMap<String, PeerHandle>>>,
    next_peer_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            next_peer_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    /// Register a peer, evicting any existing session under the same
    /// identity. The evicted peer (if any) is sent an `EVICTED` error
    /// envelope over its own outbox and has its kill switch fired, which
    /// the caller's read loop must select against to actually stop serving
    /// that connection and close its socket. Returns the assigned
    /// `peer_id`.
    pub fn register(
        &self,
        identity: String,
        role: PeerRole,
        capabilities: Vec<String>,
        outbox: mpsc::Sender<Envelope>,
        kill: oneshot::Sender<()>,
    ) -> u64 {
        use std::sync::atomic::Ordering;
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let record = PeerRecord {
            peer_id,
            identity: identity.clone(),
            role,
            capabilities,
            registered_at: now,
            last_heartbeat_at: now,
        };

        let mut peers = self.peers.write();
        let evicted = peers.insert(identity.clone(), PeerHandle { record, outbox, kill });
        if let Some(old) = evicted {
            let notice = Envelope::error(
                uuid::Uuid::new_v4().to_string(),
                codes::EVICTED,
                "re-registered from another connection",
            );
            if old.outbox.try_send(notice).is_err() {
                warn!(identity, "could not deliver EVICTED notice; outbox full or closed");
            }
            let _ = old.kill.send(());
            info!(identity, "re-registration evicted prior session");
        } else {
            debug!(identity, peer_id, "peer registered");
        }
        peer_id
    }

    pub fn remove(&self, identity: &str) {
        self.peers.write().remove(identity);
    }

    pub fn touch_heartbeat(&self, identity: &str) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(identity) {
            Some(handle) => {
                handle.record.last_heartbeat_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn outbox(&self, identity: &str) -> Option<mpsc::Sender<Envelope>> {
        self.peers.read().get(identity).map(|h| h.outbox.clone())
    }

    pub fn record(&self, identity: &str) -> Option<PeerRecord> {
        self.peers.read().get(identity).map(|h| h.record.clone())
    }

    pub fn list(&self) -> Vec<PeerRecord> {
        self.peers.read().values().map(|h| h.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Identities whose last heartbeat is older than `cutoff`.
    pub fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.peers
            .read()
            .values()
            .filter(|h| h.record.last_heartbeat_at < cutoff)
            .map(|h| h.record.identity.clone())
            .collect()
    }
}
