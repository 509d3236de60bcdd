//! End-to-end scenarios against a real endpoint client talking to a minimal
//! fake hub over loopback, mirroring spec.md §8's register/command/response
//! round trip from the endpoint's side.

use futures_util::{SinkExt, StreamExt};
use relay_agent::client::EndpointClient;
use relay_agent::reconnect::ReconnectState;
use relay_agent::scheduler::Scheduler;
use relay_config::ReconnectSection;
use relay_config::FabricConfig;
use relay_health::{HealthMonitor, HealthThresholds};
use relay_observe::OperationsMetrics;
use relay_proto::{codec, AckPayload, CommandPayload, Envelope, Response};
use relay_registry::{Handler, HandlerError, Registry};
use relay_reload::ReloadManager;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

struct Echo;
#[async_trait::async_trait]
impl Handler for Echo {
    async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
        Ok(params)
    }
}

async fn fake_hub_accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _addr) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn expect_register(socket: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let envelope = codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
                if let Envelope::Register { id, .. } = envelope {
                    return id;
                }
            }
            _ => continue,
        }
    }
}

async fn send(socket: &mut WebSocketStream<TcpStream>, envelope: &Envelope) {
    let text = codec::encode(envelope).unwrap();
    socket.send(Message::Text(text.into())).await.unwrap();
}

fn test_scheduler() -> Arc<Scheduler> {
    let registry = Registry::new();
    registry.register("echo", Arc::new(Echo));
    Arc::new(Scheduler::new(
        registry,
        4,
        Duration::from_secs(5),
        Arc::new(OperationsMetrics::new()),
        Arc::new(HealthMonitor::new(10, HealthThresholds::default())),
    ))
}

#[tokio::test]
async fn endpoint_registers_and_answers_a_forwarded_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");

    let hub_task = tokio::spawn(async move {
        let mut socket = fake_hub_accept(&listener).await;
        expect_register(&mut socket).await;
        send(
            &mut socket,
            &Envelope::Ack {
                id: "welcome".to_string(),
                timestamp: chrono::Utc::now(),
                payload: AckPayload { peer_id: 1, server_time: chrono::Utc::now() },
            },
        )
        .await;

        send(
            &mut socket,
            &Envelope::Command {
                id: "cmd-1".to_string(),
                timestamp: chrono::Utc::now(),
                payload: CommandPayload { command: "echo".to_string(), params: json!({"x": 1}), timeout_s: None },
            },
        )
        .await;

        loop {
            match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    let envelope = codec::decode(&text, codec::DEFAULT_MAX_MESSAGE_SIZE).unwrap();
                    if let Envelope::Response { id, payload, .. } = envelope {
                        assert_eq!(id, "cmd-1");
                        return payload;
                    }
                }
                _ => continue,
            }
        }
    });

    let reload = Arc::new(
        ReloadManager::start(None, None, Duration::from_millis(100), FabricConfig::default()).expect("reload manager starts"),
    );
    let client = EndpointClient::new("endpoint-under-test".to_string(), vec!["echo".to_string()], test_scheduler(), reload);
    let mut reconnect = ReconnectState::new(&ReconnectSection { initial_s: 1, max_s: 60, multiplier: 2.0, jitter: 0.2 });

    let client_task = tokio::spawn(async move {
        tokio::time::timeout(Duration::from_secs(5), client.run(&url, &mut reconnect)).await
    });

    let response: Response = hub_task.await.unwrap();
    assert!(response.success);
    assert_eq!(response.data.unwrap(), json!({"x": 1}));

    client_task.abort();
}
