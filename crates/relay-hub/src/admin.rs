//! Admin command surface (§6.3-§6.4) — the hub's own built-in commands,
//! as opposed to commands forwarded through to an endpoint.

use crate::state::AppState;
use relay_proto::{codes, BroadcastCommandParams, ErrorInfo, ForwardCommandParams, Response};
use relay_reload::ReloadAction;
use serde_json::json;
use std::time::Duration;

/// Dispatch one admin-issued command against the hub's own state (never
/// forwarded to an endpoint, except `forward_command`/`broadcast_command`
/// which delegate to the [`crate::router::Router`]).
pub async fn dispatch(state: &AppState, command: &str, params: serde_json::Value) -> Response {
    let start = std::time::Instant::now();
    match command {
        "list_clients" => {
            let peers: Vec<_> = state
                .sessions
                .list()
                .into_iter()
                .map(|p| {
                    json!({
                        "peer_id": p.peer_id,
                        "identity": p.identity,
                        "role": if p.role == crate::session::PeerRole::Admin { "admin" } else { "endpoint" },
                        "capabilities": p.capabilities,
                        "registered_at": p.registered_at,
                        "last_heartbeat_at": p.last_heartbeat_at,
                        "status": "connected",
                    })
                })
                .collect();
            Response::success(command, json!(peers), elapsed(start))
        }

        "get_stats" => {
            let config = state.config();
            let data = json!({
                "peer_count": state.sessions.len(),
                "commands_total": state.metrics.commands_total.get(),
                "commands_succeeded": state.metrics.commands_succeeded.get(),
                "commands_failed": state.metrics.commands_failed.get(),
                "commands_in_flight": state.metrics.commands_in_flight.get(),
                "latency_ema_ms": state.metrics.latency_ema_ms(),
                "hub_port": config.hub.port,
            });
            Response::success(command, data, elapsed(start))
        }

        "forward_command" => {
            let params: ForwardCommandParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(command, e, start),
            };
            let timeout = Duration::from_secs_f64(params.timeout_s.unwrap_or(60.0));
            state.metrics.record_dispatch();
            let result = state
                .router
                .forward(&params.target_identity, params.inner_command, params.inner_params, timeout)
                .await;
            let response = route_result_to_response(command, result, start);
            state.metrics.record_completion(response.success, elapsed(start));
            response
        }

        "broadcast_command" => {
            let params: BroadcastCommandParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return invalid_params(command, e, start),
            };
            let timeout = Duration::from_secs_f64(params.timeout_s.unwrap_or(60.0));
            let results = state
                .router
                .broadcast(params.inner_command, params.inner_params, timeout)
                .await;
            let mut pairs: Vec<_> = results.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Response::success(command, json!(pairs), elapsed(start))
        }

        "disconnect_client" => {
            let Some(peer_id) = params.get("peer_id").and_then(|v| v.as_u64()) else {
                return invalid_params_msg(command, "missing peer_id", start);
            };
            let Some(identity) = state.sessions.list().into_iter().find(|p| p.peer_id == peer_id).map(|p| p.identity)
            else {
                return Response::error(command, ErrorInfo::new(codes::UNKNOWN_TARGET, "no peer with that id"), elapsed(start));
            };
            state.sessions.remove(&identity);
            state.router.on_disconnect(&identity);
            Response::success(command, json!({"identity": identity}), elapsed(start))
        }

        "reload_plugins" => match state.plugins.reload() {
            Ok(count) => Response::success(command, json!({"loaded": count}), elapsed(start)),
            Err(e) => Response::error(command, ErrorInfo::new(codes::RELOAD_FAILED, e.to_string()), elapsed(start)),
        },

        "hot_reload" => {
            let action = params.get("action").and_then(|v| v.as_str()).unwrap_or("status");
            match action {
                "status" => Response::success(command, json!({"config": state.config()}), elapsed(start)),
                "reload_module" | "reload_all" => match state.reload.trigger(ReloadAction::Modules) {
                    Ok(()) => Response::success(command, json!({"action": action}), elapsed(start)),
                    Err(e) => Response::error(command, ErrorInfo::new(codes::RELOAD_FAILED, e.to_string()), elapsed(start)),
                },
                "reload_config" => match state.reload.trigger(ReloadAction::Config) {
                    Ok(()) => Response::success(command, json!({"action": action}), elapsed(start)),
                    Err(e) => Response::error(command, ErrorInfo::new(codes::RELOAD_FAILED, e.to_string()), elapsed(start)),
                },
                other => invalid_params_msg(command, &format!("unknown hot_reload action: {other}"), start),
            }
        }

        other => Response::error(
            command,
            ErrorInfo::new(codes::UNKNOWN_COMMAND, format!("unknown admin command: {other}")),
            elapsed(start),
        ),
    }
}

fn elapsed(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

fn invalid_params(command: &str, e: serde_json::Error, start: std::time::Instant) -> Response {
    invalid_params_msg(command, &e.to_string(), start)
}

fn invalid_params_msg(command: &str, message: &str, start: std::time::Instant) -> Response {
    Response::error(command, ErrorInfo::new(codes::INVALID_PARAMS, message), elapsed(start))
}

fn route_result_to_response(
    command: &str,
    result: Result<Response, crate::router::RouteError>,
    start: std::time::Instant,
) -> Response {
    use crate::router::RouteError;
    match result {
        Ok(response) => response,
        Err(RouteError::UnknownTarget(target)) => Response::error(
            command,
            ErrorInfo::new(codes::UNKNOWN_TARGET, format!("no endpoint registered as {target}")),
            elapsed(start),
        ),
        Err(RouteError::Timeout(timeout)) => Response::error(
            command,
            ErrorInfo::new(codes::TIMEOUT, format!("no response within {timeout:?}")),
            elapsed(start),
        ),
        Err(RouteError::Disconnected) => Response::error(
            command,
            ErrorInfo::new(codes::DISCONNECT, "target disconnected before responding"),
            elapsed(start),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginLoader;
    use relay_config::FabricConfig;
    use relay_observe::LogRing;
    use relay_reload::ReloadManager;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let reload = Arc::new(ReloadManager::start(None, None, Duration::from_millis(50), FabricConfig::default()).unwrap());
        let logs = Arc::new(LogRing::new(100));
        AppState::new(reload, logs, PluginLoader::new(None))
    }

    #[tokio::test]
    async fn list_clients_on_empty_hub_is_an_empty_list() {
        let state = test_state();
        let response = dispatch(&state, "list_clients", json!({})).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap().as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn get_stats_reports_zero_counts_on_a_fresh_hub() {
        let state = test_state();
        let response = dispatch(&state, "get_stats", json!({})).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap()["peer_count"], 0);
    }

    #[tokio::test]
    async fn forward_command_to_unknown_target_is_unknown_target_error() {
        let state = test_state();
        let params = json!({"target_identity": "ghost", "inner_command": "ping", "inner_params": {}});
        let response = dispatch(&state, "forward_command", params).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::UNKNOWN_TARGET);
    }

    #[tokio::test]
    async fn disconnect_client_with_unknown_peer_id_errors() {
        let state = test_state();
        let response = dispatch(&state, "disconnect_client", json!({"peer_id": 999})).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::UNKNOWN_TARGET);
    }

    #[tokio::test]
    async fn unknown_admin_command_is_unknown_command_error() {
        let state = test_state();
        let response = dispatch(&state, "not_a_real_command", json!({})).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn reload_plugins_with_no_plugin_dir_loads_zero() {
        let state = test_state();
        let response = dispatch(&state, "reload_plugins", json!({})).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap()["loaded"], 0);
    }
}
