//! Orchestrator (C9): drives one intent from plan resolution through
//! sequential step execution to a final [`ExecutionResult`], optionally
//! emitting streaming events (C10) and always forwarding to the audit
//! sink (C11).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audit::AuditSink;
use crate::cache::{Cache, CacheKey};
use crate::context::ExecutionContext;
use crate::executors::StepExecutor;
use crate::planner::{Planner, PlanningError};
use crate::protocol::{AuditAction, AuditRecord, ErrorCategory, ExecutionResult, Plan, Principal, StepResult};
use crate::streaming::{EventEmitter, EventType, StreamEvent};

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn StepExecutor>,
    cache: Arc<Cache>,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(planner: Arc<dyn Planner>, executor: Arc<dyn StepExecutor>, cache: Arc<Cache>, audit: Arc<dyn AuditSink>) -> Self {
        Self { planner, executor, cache, audit }
    }

    /// Resolves a plan for `intent` (cache first, then the Planner),
    /// without executing it. Used by the `/api/intent/plan` endpoint and
    /// the `plan-only` CLI subcommand.
    pub async fn plan(&self, intent: &str, principal: &Principal) -> Result<Plan, PlanningError> {
        let key = CacheKey::new(&principal.user_id, intent);
        if let Some(cached) = self.cache.get(&key) {
            if let Ok(plan) = serde_json::from_value::<Plan>(cached) {
                return Ok(plan);
            }
        }
        let plan = self.planner.plan(intent, principal).await?;
        if let Ok(value) = serde_json::to_value(&plan) {
            self.cache.set(key, value);
        }
        Ok(plan)
    }

    /// Executes `intent` end to end (§4.7), without streaming.
    pub async fn execute(
        &self,
        intent: &str,
        principal: &Principal,
        bearer_token: &str,
        correlation_id: &str,
    ) -> Result<ExecutionResult, PlanningError> {
        self.run(intent, principal, bearer_token, correlation_id, None).await
    }

    /// Executes `intent` end to end, emitting a [`StreamEvent`] per
    /// §4.9's ordering guarantees on `emitter`.
    pub async fn execute_streaming(
        &self,
        intent: &str,
        principal: &Principal,
        bearer_token: &str,
        correlation_id: &str,
        emitter: EventEmitter,
    ) -> Result<ExecutionResult, PlanningError> {
        self.run(intent, principal, bearer_token, correlation_id, Some(emitter)).await
    }

    async fn run(
        &self,
        intent: &str,
        principal: &Principal,
        bearer_token: &str,
        correlation_id: &str,
        emitter: Option<EventEmitter>,
    ) -> Result<ExecutionResult, PlanningError> {
        let started = Instant::now();
        if let Some(e) = &emitter {
            e.emit(StreamEvent::execution_level(
                EventType::ExecutionStarted,
                serde_json::json!({"intent": intent}),
                started.elapsed().as_millis(),
                correlation_id,
            ));
        }

        let plan = self.plan(intent, principal).await?;
        if let Some(e) = &emitter {
            e.emit(StreamEvent::execution_level(
                EventType::PlanGenerated,
                serde_json::to_value(&plan).unwrap_or(Value::Null),
                started.elapsed().as_millis(),
                correlation_id,
            ));
        }

        let mut ctx = ExecutionContext::new(&principal.user_id, intent);
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.steps.len());
        let mut terminated_early = false;

        for (index, step) in plan.steps.iter().enumerate() {
            if let Some(e) = &emitter {
                e.emit(StreamEvent::step_level(
                    EventType::StepStarted,
                    step.order,
                    &step.service_name,
                    &step.function_name,
                    Value::Null,
                    started.elapsed().as_millis(),
                    correlation_id,
                ));
            }

            let result = self.executor.execute(step, &mut ctx, bearer_token).await;

            if let Some(e) = &emitter {
                let event_type = if result.success { EventType::StepCompleted } else { EventType::StepFailed };
                e.emit(StreamEvent::step_level(
                    event_type,
                    step.order,
                    &step.service_name,
                    &step.function_name,
                    serde_json::to_value(&result).unwrap_or(Value::Null),
                    started.elapsed().as_millis(),
                    correlation_id,
                ));
            }

            let should_terminate = !result.success
                && result.error_category == ErrorCategory::Permanent
                && !plan.steps[index + 1..].iter().any(|s| s.fallback_value.is_some());

            ctx.record(result.clone());
            results.push(result);

            if should_terminate {
                for remaining in &plan.steps[index + 1..] {
                    results.push(StepResult::skipped(remaining));
                }
                terminated_early = true;
                break;
            }
        }

        let success = !terminated_early && results.iter().all(|r| r.success);
        let aggregated_result = ExecutionResult::aggregate(&results);
        let total_duration = started.elapsed();

        let execution_result = ExecutionResult {
            plan_id: plan.id.clone(),
            intent: intent.to_string(),
            success,
            aggregated_result,
            steps: results,
            error_message: if success { None } else { Some("one or more steps failed".to_string()) },
            total_duration,
            executed_at: chrono::Utc::now(),
            correlation_id: correlation_id.to_string(),
        };

        if let Some(e) = &emitter {
            let event_type = if success { EventType::ExecutionCompleted } else { EventType::ExecutionFailed };
            e.emit(StreamEvent::execution_level(
                event_type,
                serde_json::to_value(&execution_result).unwrap_or(Value::Null),
                total_duration.as_millis(),
                correlation_id,
            ));
        }

        self.audit(&execution_result, principal).await;
        Ok(execution_result)
    }

    async fn audit(&self, result: &ExecutionResult, principal: &Principal) {
        let mut context = std::collections::HashMap::new();
        context.insert("correlationId".to_string(), Value::String(result.correlation_id.clone()));
        context.insert("planId".to_string(), Value::String(result.plan_id.clone()));
        self.audit
            .record(AuditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: principal.user_id.clone(),
                action: AuditAction::Execute,
                resource: result.intent.clone(),
                method: "POST".to_string(),
                status_code: if result.success { 200 } else { 502 },
                success: result.success,
                error_message: result.error_message.clone(),
                timestamp: result.executed_at,
                ip_address: None,
                context,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerTable;
    use crate::executors::http::{DownstreamError, GatewayStepExecutor, HttpDownstreamClient};
    use std::collections::HashMap;

    fn principal() -> Principal {
        Principal { user_id: "u1".to_string(), roles: vec![] }
    }

    struct StaticPlanner(Plan);

    #[async_trait::async_trait]
    impl Planner for StaticPlanner {
        async fn plan(&self, intent: &str, _principal: &Principal) -> Result<Plan, PlanningError> {
            let mut plan = self.0.clone();
            plan.intent = intent.to_string();
            Ok(plan)
        }
    }

    struct ScriptedExecutor;

    #[async_trait::async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            step: &crate::protocol::Step,
            _ctx: &mut ExecutionContext,
            _bearer_token: &str,
        ) -> StepResult {
            StepResult {
                order: step.order,
                service_name: step.service_name.clone(),
                function_name: step.function_name.clone(),
                success: true,
                value: Some(serde_json::json!({"order": step.order})),
                error: None,
                duration: Duration::from_millis(1),
                retry_count: 0,
                used_fallback: false,
                error_category: ErrorCategory::Unknown,
            }
        }
    }

    fn plan_with_steps(n: u32) -> Plan {
        Plan {
            id: "p1".to_string(),
            intent: "do a thing".to_string(),
            steps: (1..=n)
                .map(|order| crate::protocol::Step {
                    order,
                    service_name: "Svc".to_string(),
                    function_name: "Fn".to_string(),
                    description: None,
                    parameters: HashMap::new(),
                    fallback_value: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn single_step_execution_reports_success() {
        let orchestrator = Orchestrator::new(
            Arc::new(StaticPlanner(plan_with_steps(1))),
            Arc::new(ScriptedExecutor),
            Arc::new(Cache::new(Duration::from_secs(60))),
            Arc::new(crate::audit::InMemoryAuditSink::new()),
        );
        let result = orchestrator.execute("do a thing", &principal(), "Bearer tok", "corr-1").await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.aggregated_result, serde_json::json!({"order": 1}));
    }

    #[tokio::test]
    async fn permanent_failure_without_fallback_skips_remaining_steps() {
        let client = Arc::new(HttpDownstreamClient::new(HashMap::new()));
        let breaker = Arc::new(CircuitBreakerTable::default());
        let _ = DownstreamError { message: "unused".into(), http_status: None };
        let executor = Arc::new(GatewayStepExecutor::new(client, breaker));
        let orchestrator = Orchestrator::new(
            Arc::new(StaticPlanner(plan_with_steps(2))),
            executor,
            Arc::new(Cache::new(Duration::from_secs(60))),
            Arc::new(crate::audit::InMemoryAuditSink::new()),
        );
        // No base URL is configured for "Svc", so the first call fails
        // permanently (no retryable classification) with no fallback.
        let result = orchestrator.execute("do a thing", &principal(), "Bearer tok", "corr-2").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert!(!result.steps[1].success);
        assert_eq!(result.steps[1].retry_count, 0);
    }

    #[tokio::test]
    async fn plan_is_served_from_cache_on_second_call() {
        let orchestrator = Orchestrator::new(
            Arc::new(StaticPlanner(plan_with_steps(1))),
            Arc::new(ScriptedExecutor),
            Arc::new(Cache::new(Duration::from_secs(60))),
            Arc::new(crate::audit::InMemoryAuditSink::new()),
        );
        let first = orchestrator.plan("do a thing", &principal()).await.unwrap();
        let second = orchestrator.plan("do a thing", &principal()).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
