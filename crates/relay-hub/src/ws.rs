//! WebSocket accept side (C7) — upgrades an HTTP connection, performs the
//! register/ack handshake, then pumps envelopes between the socket and the
//! peer's outbox for the connection's lifetime.

use crate::admin;
use crate::session::PeerRole;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use relay_proto::{codec, AckPayload, Envelope, RegisterPayload};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Grace period to wait for the initial `register` envelope before giving
/// up on a connection.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let Some(registration) = await_register(&mut socket).await else {
        return;
    };
    let RegisterPayload {
        identity,
        capabilities,
        role,
        ..
    } = registration;
    let role = PeerRole::from_wire(&role);

    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Envelope>(64);
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let peer_id = state.sessions.register(identity.clone(), role, capabilities, outbox_tx, kill_tx);

    let ack = Envelope::Ack {
        id: "welcome".to_string(),
        timestamp: chrono::Utc::now(),
        payload: AckPayload {
            peer_id,
            server_time: chrono::Utc::now(),
        },
    };
    let Ok(ack_text) = codec::encode(&ack) else {
        state.sessions.remove(&identity);
        return;
    };
    if socket.send(Message::Text(ack_text.into())).await.is_err() {
        state.sessions.remove(&identity);
        return;
    }

    let (mut sink, mut stream) = socket.split();
    let write_identity = identity.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbox_rx.recv().await {
            match codec::encode(&envelope) {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(identity = %write_identity, error = %e, "failed to encode outgoing envelope"),
            }
        }
    });

    let mut evicted = false;
    loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                evicted = true;
                break;
            }
            message = stream.next() => {
                let Some(Ok(message)) = message else { break };
                let Message::Text(text) = message else { continue };
                let envelope = match codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(identity, error = %e, "dropping malformed envelope");
                        continue;
                    }
                };
                handle_envelope(&state, &identity, role, envelope).await;
            }
        }
    }

    if evicted {
        // A newer registration under this identity already replaced our
        // session table entry and already sent us an EVICTED notice over
        // this same outbox. Don't abort the writer here: it still needs to
        // drain that notice to the socket, which it will do on its own and
        // then exit once the registry's eviction drops the last sender.
        info!(identity, "connection closed: evicted by re-registration");
    } else {
        info!(identity, "peer connection closed");
        state.sessions.remove(&identity);
        state.router.on_disconnect(&identity);
        writer.abort();
    }
}

async fn handle_envelope(state: &AppState, identity: &str, role: PeerRole, envelope: Envelope) {
    match envelope {
        Envelope::Heartbeat { .. } => {
            state.sessions.touch_heartbeat(identity);
        }
        Envelope::Response { id, payload, .. } => {
            state.router.resolve_response(&id, payload);
        }
        Envelope::Command { id, payload, .. } if role == PeerRole::Admin => {
            let response = admin::dispatch(state, &payload.command, payload.params).await;
            if let Some(outbox) = state.sessions.outbox(identity) {
                let _ = outbox.send(Envelope::response(id, response)).await;
            }
        }
        Envelope::Command { .. } => {
            debug!(identity, "ignoring command envelope from a non-admin peer");
        }
        Envelope::Event { .. } => {
            debug!(identity, "ignoring event envelope; the hub consumes none");
        }
        other => {
            debug!(identity, kind = other.type_name(), "ignoring unexpected envelope type");
        }
    }
}

/// Wait for the handshake `register` envelope and validate it. Returns
/// `None` (closing the connection) on timeout, malformed input, or an
/// invalid identity; the caller registers the peer once it has an outbox.
async fn await_register(socket: &mut WebSocket) -> Option<RegisterPayload> {
    let message = match tokio::time::timeout(REGISTER_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(message))) => message,
        _ => {
            warn!("connection closed before sending register envelope");
            return None;
        }
    };

    let Message::Text(text) = message else {
        warn!("first frame was not text; expected a register envelope");
        return None;
    };

    let envelope = match codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed register envelope");
            return None;
        }
    };

    let Envelope::Register { payload, .. } = envelope else {
        warn!(kind = envelope.type_name(), "expected register as the first envelope");
        return None;
    };

    if !relay_proto::validate_identity(&payload.identity) {
        warn!(identity = payload.identity, "rejected invalid identity");
        return None;
    }

    Some(payload)
}
