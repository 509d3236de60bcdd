//! Cooperative command scheduler (C4) — dispatches one incoming `command`
//! envelope at a time: resolves the handler, applies the effective timeout,
//! offloads blocking handlers to a bounded worker pool, and always produces
//! a well-formed response, accounting the outcome in metrics and health
//! regardless of how it resolved.

use relay_health::HealthMonitor;
use relay_observe::OperationsMetrics;
use relay_registry::{HandlerError, HandlerKind, Registry};
use relay_proto::{codes, ErrorInfo, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Dispatches commands against a [`Registry`], enforcing timeouts and a
/// bounded pool of concurrent blocking handlers.
pub struct Scheduler {
    registry: Registry,
    worker_permits: Arc<Semaphore>,
    default_timeout: Duration,
    metrics: Arc<OperationsMetrics>,
    health: Arc<HealthMonitor>,
}

impl Scheduler {
    pub fn new(
        registry: Registry,
        pool_size: usize,
        default_timeout: Duration,
        metrics: Arc<OperationsMetrics>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            registry,
            worker_permits: Arc::new(Semaphore::new(pool_size.max(1))),
            default_timeout,
            metrics,
            health,
        }
    }

    /// Resolve and invoke `command`, always returning a response envelope
    /// payload carrying the caller's `command` name. Unknown commands never
    /// reach a handler invocation and are not accounted as a dispatch.
    pub async fn dispatch(&self, command: &str, params: Value, timeout_s: Option<f64>) -> Response {
        let start = std::time::Instant::now();

        let Some(handler) = self.registry.lookup(command) else {
            return Response::error(
                command,
                ErrorInfo::new(codes::UNKNOWN_COMMAND, format!("no handler registered for {command}")),
                elapsed(start),
            );
        };

        self.metrics.record_dispatch();

        let effective_timeout = timeout_s
            .map(Duration::from_secs_f64)
            .or_else(|| handler.default_timeout())
            .unwrap_or(self.default_timeout);

        let response = if effective_timeout.is_zero() {
            Response::error(command, ErrorInfo::new(codes::TIMEOUT, "timeout_s=0"), elapsed(start))
        } else {
            let invoke = async {
                if handler.kind() == HandlerKind::Blocking {
                    let _permit = match self.worker_permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(HandlerError::Failed("worker pool closed".to_string()));
                        }
                    };
                    handler.invoke(params).await
                } else {
                    handler.invoke(params).await
                }
            };

            match tokio::time::timeout(effective_timeout, invoke).await {
                Ok(Ok(data)) => Response::success(command, data, elapsed(start)),
                Ok(Err(HandlerError::InvalidParams(message))) => {
                    Response::error(command, ErrorInfo::new(codes::INVALID_PARAMS, message), elapsed(start))
                }
                Ok(Err(HandlerError::Failed(message))) => {
                    Response::from_handler_failure(command, "handler_error", message, elapsed(start))
                }
                Err(_elapsed) => {
                    warn!(command, timeout_s = effective_timeout.as_secs_f64(), "command timed out");
                    Response::error(command, ErrorInfo::new(codes::TIMEOUT, "handler exceeded its timeout"), elapsed(start))
                }
            }
        };

        self.metrics.record_completion(response.success, elapsed(start) * 1000.0);
        self.health.record_command_outcome(response.success);
        response
    }
}

fn elapsed(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_health::HealthThresholds;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    struct Echo;
    #[async_trait]
    impl relay_registry::Handler for Echo {
        async fn invoke(&self, params: Value) -> Result<Value, HandlerError> {
            Ok(params)
        }
    }

    struct SlowHandler;
    #[async_trait]
    impl relay_registry::Handler for SlowHandler {
        async fn invoke(&self, _params: Value) -> Result<Value, HandlerError> {
            tokio::time::sleep(StdDuration::from_millis(200)).await;
            Ok(json!("done"))
        }
    }

    struct Failing;
    #[async_trait]
    impl relay_registry::Handler for Failing {
        async fn invoke(&self, _params: Value) -> Result<Value, HandlerError> {
            Err(HandlerError::Failed("boom".to_string()))
        }
    }

    fn test_scheduler() -> Scheduler {
        let registry = Registry::new();
        registry.register("echo", Arc::new(Echo));
        registry.register("slow", Arc::new(SlowHandler));
        registry.register("failing", Arc::new(Failing));
        Scheduler::new(
            registry,
            4,
            StdDuration::from_secs(5),
            Arc::new(OperationsMetrics::new()),
            Arc::new(HealthMonitor::new(10, HealthThresholds::default())),
        )
    }

    #[tokio::test]
    async fn unknown_command_is_unknown_command_error_without_invoking_anything() {
        let scheduler = test_scheduler();
        let response = scheduler.dispatch("nope", json!({}), None).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn successful_invocation_echoes_params_back() {
        let scheduler = test_scheduler();
        let response = scheduler.dispatch("echo", json!({"x": 1}), None).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn handler_failure_maps_to_handler_failed_code() {
        let scheduler = test_scheduler();
        let response = scheduler.dispatch("failing", json!({}), None).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::HANDLER_FAILED);
    }

    #[tokio::test]
    async fn zero_timeout_resolves_as_timeout_without_invoking_the_handler() {
        let scheduler = test_scheduler();
        let response = scheduler.dispatch("slow", json!({}), Some(0.0)).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::TIMEOUT);
    }

    #[tokio::test]
    async fn a_short_timeout_against_a_slow_handler_times_out() {
        let scheduler = test_scheduler();
        let response = scheduler.dispatch("slow", json!({}), Some(0.01)).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, codes::TIMEOUT);
    }

    #[tokio::test]
    async fn every_outcome_is_accounted_in_metrics() {
        let scheduler = test_scheduler();
        scheduler.dispatch("echo", json!({}), None).await;
        scheduler.dispatch("failing", json!({}), None).await;
        assert_eq!(scheduler.metrics.commands_total.get(), 2);
        assert_eq!(scheduler.metrics.commands_succeeded.get(), 1);
        assert_eq!(scheduler.metrics.commands_failed.get(), 1);
    }
}
