//! HTTP-backed [`DownstreamServiceClient`] and the default
//! [`StepExecutor`] composing resolution, the circuit breaker, and the
//! retry/timeout policy around it (§4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreakerTable;
use crate::context::ExecutionContext;
use crate::protocol::{ErrorCategory, RetryAttempt, Step, StepError, StepResult};
use crate::resolver;
use crate::retry::{self, Outcome, RetryExecutor, RetryPolicy};

use super::{DownstreamServiceClient, StepExecutor};

#[derive(Debug, Clone)]
pub struct DownstreamError {
    pub message: String,
    pub http_status: Option<u16>,
}

impl std::fmt::Display for DownstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Resolves a service name to a base URL per `ServiceDiscovery.{Name}Url`
/// and calls `{baseUrl}/{functionName}` with the resolved parameters as
/// a JSON body, propagating the caller's bearer token unchanged (P8).
pub struct HttpDownstreamClient {
    client: Client,
    service_urls: HashMap<String, String>,
}

impl HttpDownstreamClient {
    pub fn new(service_urls: HashMap<String, String>) -> Self {
        Self { client: Client::new(), service_urls }
    }
}

#[async_trait]
impl DownstreamServiceClient for HttpDownstreamClient {
    async fn call(
        &self,
        service_name: &str,
        function_name: &str,
        parameters: &Value,
        bearer_token: &str,
    ) -> Result<Value, DownstreamError> {
        let base_url = self.service_urls.get(service_name).ok_or_else(|| DownstreamError {
            message: format!("no base URL configured for service '{service_name}'"),
            http_status: None,
        })?;
        let url = format!("{}/{}", base_url.trim_end_matches('/'), function_name);

        let response = self
            .client
            .post(&url)
            .header("Authorization", bearer_token)
            .json(parameters)
            .send()
            .await
            .map_err(|e| DownstreamError { message: e.to_string(), http_status: e.status().map(|s| s.as_u16()) })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError {
                message: format!("downstream call to {service_name}.{function_name} failed: {body}"),
                http_status: Some(status.as_u16()),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DownstreamError { message: format!("invalid JSON response: {e}"), http_status: None })
    }
}

/// Default [`StepExecutor`]: resolve parameters (C7), consult the
/// breaker (C5), invoke through a [`DownstreamServiceClient`] under
/// retry/timeout (C6), apply fallback, and notify the breaker.
pub struct GatewayStepExecutor {
    client: Arc<dyn DownstreamServiceClient>,
    breaker: Arc<CircuitBreakerTable>,
    policies: HashMap<String, RetryPolicy>,
    default_policy: RetryPolicy,
}

impl GatewayStepExecutor {
    pub fn new(client: Arc<dyn DownstreamServiceClient>, breaker: Arc<CircuitBreakerTable>) -> Self {
        Self {
            client,
            breaker,
            policies: HashMap::new(),
            default_policy: RetryPolicy::default(),
        }
    }

    pub fn with_service_policy(mut self, service_name: impl Into<String>, policy: RetryPolicy) -> Self {
        self.policies.insert(service_name.into(), policy);
        self
    }

    fn policy_for(&self, service_name: &str) -> RetryPolicy {
        self.policies.get(service_name).cloned().unwrap_or_else(|| self.default_policy.clone())
    }
}

#[async_trait]
impl StepExecutor for GatewayStepExecutor {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext, bearer_token: &str) -> StepResult {
        let start = Instant::now();

        let resolved_params = resolver::resolve(
            &Value::Object(step.parameters.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            ctx,
        );

        if !self.breaker.allow(&step.service_name).await {
            warn!(service = %step.service_name, "circuit breaker open, failing fast");
            let error = StepError {
                message: format!("circuit breaker open for service '{}'", step.service_name),
                category: ErrorCategory::Transient,
                retry_attempts: 0,
                retry_history: Vec::new(),
                http_status: None,
                used_fallback: false,
                fallback_value: None,
            };
            return self.finish(step, start, error);
        }

        let policy = self.policy_for(&step.service_name);
        let executor = RetryExecutor::new(policy.clone());
        let client = self.client.clone();
        let service_name = step.service_name.clone();
        let function_name = step.function_name.clone();
        let token = bearer_token.to_string();

        let outcome = executor
            .execute(
                &step.service_name,
                |e: &DownstreamError| (retry::classify(&e.message, e.http_status), e.http_status),
                || {
                    let client = client.clone();
                    let service_name = service_name.clone();
                    let function_name = function_name.clone();
                    let params = resolved_params.clone();
                    let token = token.clone();
                    let timeout = policy.timeout;
                    async move {
                        match tokio::time::timeout(
                            timeout,
                            client.call(&service_name, &function_name, &params, &token),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(DownstreamError {
                                message: format!("step timed out after {timeout:?}"),
                                http_status: None,
                            }),
                        }
                    }
                },
            )
            .await;

        match outcome {
            Outcome::Success { value, retry_history } => {
                self.breaker.record_success(&step.service_name).await;
                info!(service = %step.service_name, function = %step.function_name, "step succeeded");
                self.finish_success(step, start, value, retry_history)
            }
            Outcome::Exhausted { error, retry_history, category } => {
                self.breaker.record_failure(&step.service_name).await;
                let step_error = StepError {
                    message: error.message,
                    category,
                    retry_attempts: retry_history.len() as u32,
                    retry_history,
                    http_status: error.http_status,
                    used_fallback: false,
                    fallback_value: None,
                };
                self.finish(step, start, step_error)
            }
        }
    }
}

impl GatewayStepExecutor {
    fn finish_success(
        &self,
        step: &Step,
        start: Instant,
        value: Value,
        retry_history: Vec<RetryAttempt>,
    ) -> StepResult {
        StepResult {
            order: step.order,
            service_name: step.service_name.clone(),
            function_name: step.function_name.clone(),
            success: true,
            value: Some(value),
            error: None,
            duration: start.elapsed(),
            retry_count: retry_history.len() as u32,
            used_fallback: false,
            error_category: ErrorCategory::Unknown,
        }
    }

    /// Builds the final `StepResult` for a failed attempt, applying the
    /// step's `fallbackValue` if one is configured (§4.6 step 5).
    fn finish(&self, step: &Step, start: Instant, error: StepError) -> StepResult {
        let duration = start.elapsed();
        let retry_count = error.retry_attempts;
        let category = error.category;

        if let Some(fallback) = step.fallback_value.clone() {
            return StepResult {
                order: step.order,
                service_name: step.service_name.clone(),
                function_name: step.function_name.clone(),
                success: true,
                value: Some(fallback.clone()),
                error: Some(StepError { used_fallback: true, fallback_value: Some(fallback), ..error }),
                duration,
                retry_count,
                used_fallback: true,
                error_category: category,
            };
        }

        StepResult {
            order: step.order,
            service_name: step.service_name.clone(),
            function_name: step.function_name.clone(),
            success: false,
            value: None,
            error: Some(error),
            duration,
            retry_count,
            used_fallback: false,
            error_category: category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedClient {
        responses: Vec<Result<Value, DownstreamError>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DownstreamServiceClient for ScriptedClient {
        async fn call(
            &self,
            _service_name: &str,
            _function_name: &str,
            _parameters: &Value,
            _bearer_token: &str,
        ) -> Result<Value, DownstreamError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.responses.get(idx).cloned().unwrap_or_else(|| {
                Err(DownstreamError { message: "no more scripted responses".into(), http_status: None })
            })
        }
    }

    fn step(order: u32, fallback: Option<Value>) -> Step {
        Step {
            order,
            service_name: "UserService".into(),
            function_name: "GetUser".into(),
            description: None,
            parameters: HashMap::new(),
            fallback_value: fallback,
        }
    }

    #[tokio::test]
    async fn success_records_value_and_no_retries() {
        let client = Arc::new(ScriptedClient {
            responses: vec![Ok(serde_json::json!({"userId": "u1"}))],
            calls: AtomicU32::new(0),
        });
        let breaker = Arc::new(CircuitBreakerTable::default());
        let executor = GatewayStepExecutor::new(client, breaker);
        let mut ctx = ExecutionContext::new("u1", "look up user");

        let result = executor.execute(&step(1, None), &mut ctx, "Bearer tok").await;
        assert!(result.success);
        assert_eq!(result.retry_count, 0);
        assert_eq!(result.value, Some(serde_json::json!({"userId": "u1"})));
    }

    #[tokio::test]
    async fn permanent_failure_without_fallback_is_unsuccessful() {
        let client = Arc::new(ScriptedClient {
            responses: vec![Err(DownstreamError { message: "not found".into(), http_status: Some(404) })],
            calls: AtomicU32::new(0),
        });
        let breaker = Arc::new(CircuitBreakerTable::default());
        let executor = GatewayStepExecutor::new(client, breaker);
        let mut ctx = ExecutionContext::new("u1", "look up user");

        let result = executor.execute(&step(1, None), &mut ctx, "Bearer tok").await;
        assert!(!result.success);
        assert_eq!(result.error_category, ErrorCategory::Permanent);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn permanent_failure_with_fallback_recovers() {
        let client = Arc::new(ScriptedClient {
            responses: vec![Err(DownstreamError { message: "forbidden".into(), http_status: Some(403) })],
            calls: AtomicU32::new(0),
        });
        let breaker = Arc::new(CircuitBreakerTable::default());
        let executor = GatewayStepExecutor::new(client, breaker);
        let mut ctx = ExecutionContext::new("u1", "look up user");
        let fallback = serde_json::json!({"role": "guest"});

        let result = executor.execute(&step(1, Some(fallback.clone())), &mut ctx, "Bearer tok").await;
        assert!(result.success);
        assert!(result.used_fallback);
        assert_eq!(result.value, Some(fallback));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let client = Arc::new(ScriptedClient {
            responses: vec![
                Err(DownstreamError { message: "connection reset".into(), http_status: None }),
                Ok(serde_json::json!({"ok": true})),
            ],
            calls: AtomicU32::new(0),
        });
        let breaker = Arc::new(CircuitBreakerTable::default());
        let executor = GatewayStepExecutor::new(client, breaker)
            .with_service_policy("UserService", RetryPolicy { backoff_ms: 5, ..RetryPolicy::default() });
        let mut ctx = ExecutionContext::new("u1", "look up user");

        let result = executor.execute(&step(1, None), &mut ctx, "Bearer tok").await;
        assert!(result.success);
        assert_eq!(result.retry_count, 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling_downstream() {
        let client = Arc::new(ScriptedClient { responses: vec![], calls: AtomicU32::new(0) });
        let breaker = Arc::new(CircuitBreakerTable::new(1, 2, Duration::from_secs(60)));
        breaker.record_failure("UserService").await;
        let executor = GatewayStepExecutor::new(client, breaker);
        let mut ctx = ExecutionContext::new("u1", "look up user");

        let result = executor.execute(&step(1, None), &mut ctx, "Bearer tok").await;
        assert!(!result.success);
        assert_eq!(result.error_category, ErrorCategory::Transient);
    }
}
