//! Reconnect engine and wire loop (C5, C6) — dials the hub, performs the
//! register/ack handshake, then pumps envelopes between the socket and the
//! scheduler for the connection's lifetime. On disconnect, falls back into
//! the caller's reconnect loop with exponential backoff and jitter.

use crate::error::AgentError;
use crate::reconnect::ReconnectState;
use crate::scheduler::Scheduler;
use futures_util::{SinkExt, StreamExt};
use rand::thread_rng;
use relay_proto::{codec, AckPayload, Envelope, RegisterPayload};
use relay_reload::ReloadManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct EndpointClient {
    pub identity: String,
    pub capabilities: Vec<String>,
    pub scheduler: Arc<Scheduler>,
    pub reload: Arc<ReloadManager>,
}

impl EndpointClient {
    pub fn new(identity: String, capabilities: Vec<String>, scheduler: Arc<Scheduler>, reload: Arc<ReloadManager>) -> Self {
        Self { identity, capabilities, scheduler, reload }
    }

    /// Run forever: dial, register, serve, and on any disconnect sleep for
    /// the next backoff delay before dialing again. Never returns under
    /// normal operation.
    pub async fn run(&self, hub_url: &str, reconnect: &mut ReconnectState) -> ! {
        loop {
            info!(hub_url, attempt = reconnect.attempt_count(), "dialing hub");
            match self.connect_once(hub_url, reconnect).await {
                Ok(()) => {
                    info!("connection closed cleanly; reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "connection attempt failed");
                }
            }
            let delay = {
                let mut rng = thread_rng();
                reconnect.next_delay(&mut rng)
            };
            info!(delay_s = delay.as_secs_f64(), "waiting before next reconnect attempt");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection lifecycle: dial, register, await ack, then serve the
    /// scheduler loop until the socket closes or errors. `reconnect` is
    /// reset to its initial delay as soon as the handshake succeeds, per
    /// spec.md §4.5 (no resumption of in-flight commands across reconnect —
    /// that is the hub's responsibility via its own disconnect handling).
    async fn connect_once(&self, hub_url: &str, reconnect: &mut ReconnectState) -> Result<(), AgentError> {
        let (ws, _response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(hub_url))
            .await
            .map_err(|_| AgentError::Connection("dial timed out".to_string()))?
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        let (mut sink, mut stream) = ws.split();

        let register = Envelope::Register {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            payload: RegisterPayload {
                identity: self.identity.clone(),
                capabilities: self.capabilities.clone(),
                version: 1,
                role: "endpoint".to_string(),
            },
        };
        let text = codec::encode(&register).map_err(|e| AgentError::Handshake(e.to_string()))?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;

        await_ack(&mut stream).await?;
        reconnect.reset();
        info!(identity = %self.identity, "registered with hub");

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Envelope>(64);

        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbox_rx.recv().await {
                match codec::encode(&envelope) {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outgoing envelope"),
                }
            }
        });

        let heartbeat_tx = outbox_tx.clone();
        let heartbeat_reload = self.reload.clone();
        let heartbeat_task = tokio::spawn(async move {
            loop {
                // Re-read the interval on every cycle rather than fixing it
                // at task start, so a live config change to
                // `heartbeat.interval_s` (spec.md §4.11.2) takes effect on
                // the next heartbeat instead of requiring a reconnect.
                let interval = Duration::from_secs(heartbeat_reload.current_config().heartbeat.interval_s.max(1));
                tokio::time::sleep(interval).await;
                let envelope = Envelope::heartbeat(uuid::Uuid::new_v4().to_string());
                if heartbeat_tx.send(envelope).await.is_err() {
                    break;
                }
            }
        });

        let result = self.serve(&mut stream, outbox_tx).await;

        heartbeat_task.abort();
        writer.abort();
        result
    }

    /// Read envelopes off the socket until it closes, handing each `command`
    /// envelope to its own task so a slow or blocking handler never stalls
    /// the read loop — concurrent commands must be able to execute in
    /// parallel up to the worker pool size (spec.md §4.4, §5).
    async fn serve(&self, stream: &mut WsRead, outbox: mpsc::Sender<Envelope>) -> Result<(), AgentError> {
        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| AgentError::Connection(e.to_string()))?;
            let Message::Text(text) = message else { continue };

            let envelope = match codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "dropping malformed envelope from hub");
                    continue;
                }
            };

            if let Envelope::Command { id, payload, .. } = envelope {
                let scheduler = self.scheduler.clone();
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    let response = scheduler.dispatch(&payload.command, payload.params, payload.timeout_s).await;
                    let _ = outbox.send(Envelope::response(id, response)).await;
                });
            }
        }
        Ok(())
    }
}

async fn await_ack(stream: &mut WsRead) -> Result<AckPayload, AgentError> {
    let message = tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.next())
        .await
        .map_err(|_| AgentError::Handshake("no ack within the handshake window".to_string()))?
        .ok_or_else(|| AgentError::Handshake("connection closed before ack".to_string()))?
        .map_err(|e| AgentError::Connection(e.to_string()))?;

    let Message::Text(text) = message else {
        return Err(AgentError::Handshake("expected a text frame for ack".to_string()));
    };
    let envelope = codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE).map_err(|e| AgentError::Handshake(e.to_string()))?;
    match envelope {
        Envelope::Ack { payload, .. } => Ok(payload),
        other => Err(AgentError::Handshake(format!("expected ack, got {}", other.type_name()))),
    }
}
