//! Data model for the orchestration engine: `Plan`, `Step`, `StepResult`,
//! `ExecutionResult` and the small sum types that drive error handling
//! and resilience bookkeeping.
//!
//! Parameters and results are untyped JSON-like values — a tagged union
//! over {null, bool, number, string, sequence, mapping} — which is
//! exactly what `serde_json::Value` already is, so there is no separate
//! type here.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated caller, produced once per request by the Token Verifier
/// (C1) and held immutable for the request's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// An ordered, immutable sequence of [`Step`]s realizing an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub intent: String,
    pub steps: Vec<Step>,
}

/// One downstream operation: a named function on a named service.
///
/// `order` is 1-indexed and must be strictly increasing and gap-free
/// within a plan (invariant I1); see [`crate::validation::validate_plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub order: u32,
    pub service_name: String,
    pub function_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub fallback_value: Option<Value>,
}

/// Classification of a step failure, driving retry eligibility (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Unknown,
}

/// A single retry attempt recorded in a [`StepError`]'s history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub error_message: String,
    pub wait_before_retry: Duration,
    #[serde(default)]
    pub http_status: Option<u16>,
}

/// Error detail carried on a failed (or fallback-recovered) [`StepResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub message: String,
    pub category: ErrorCategory,
    pub retry_attempts: u32,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub used_fallback: bool,
    #[serde(default)]
    pub fallback_value: Option<Value>,
}

/// Outcome of one attempted step. Exactly one is produced per plan step,
/// in plan order (invariant I3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub order: u32,
    pub service_name: String,
    pub function_name: String,
    pub success: bool,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub error: Option<StepError>,
    pub duration: Duration,
    pub retry_count: u32,
    pub used_fallback: bool,
    pub error_category: ErrorCategory,
}

impl StepResult {
    /// A result for a step that was never executed because an earlier
    /// permanent failure terminated the plan early (§4.7).
    pub fn skipped(step: &Step) -> Self {
        Self {
            order: step.order,
            service_name: step.service_name.clone(),
            function_name: step.function_name.clone(),
            success: false,
            value: None,
            error: Some(StepError {
                message: "skipped: plan terminated early by a prior permanent failure".into(),
                category: ErrorCategory::Permanent,
                retry_attempts: 0,
                retry_history: Vec::new(),
                http_status: None,
                used_fallback: false,
                fallback_value: None,
            }),
            duration: Duration::ZERO,
            retry_count: 0,
            used_fallback: false,
            error_category: ErrorCategory::Permanent,
        }
    }
}

/// A single-step or multi-step view of the aggregated result, as produced
/// by the orchestrator (§4.7 step 4).
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub order: u32,
    pub service: String,
    pub function: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u128,
}

/// Final result of executing a plan end to end.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub intent: String,
    pub success: bool,
    pub aggregated_result: Value,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub total_duration: Duration,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub correlation_id: String,
}

impl ExecutionResult {
    /// `aggregatedResult` per §4.7 step 4: the lone step's value if there
    /// is only one step, otherwise a sequence of step views.
    pub fn aggregate(steps: &[StepResult]) -> Value {
        if steps.len() == 1 {
            return steps[0].value.clone().unwrap_or(Value::Null);
        }
        let views: Vec<Value> = steps
            .iter()
            .map(|s| {
                serde_json::to_value(StepView {
                    order: s.order,
                    service: s.service_name.clone(),
                    function: s.function_name.clone(),
                    success: s.success,
                    value: s.value.clone(),
                    error: s.error.as_ref().map(|e| e.message.clone()),
                    duration_ms: s.duration.as_millis(),
                })
                .expect("StepView always serializes")
            })
            .collect();
        Value::Array(views)
    }
}

/// Per-service circuit breaker state (C5), mutated only by the breaker
/// table under its own lock — see [`crate::circuit_breaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-user quota bookkeeping (C3) — see [`crate::quota`].
#[derive(Debug, Clone)]
pub struct QuotaEntry {
    pub daily_limit: u32,
    pub used: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

/// Action recorded by the audit sink (C11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Read,
    Create,
    Update,
    Delete,
    Modify,
    Access,
    Execute,
}

/// One append-only audit record (C11).
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub user_id: String,
    pub action: AuditAction,
    pub resource: String,
    pub method: String,
    pub status_code: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_single_step_returns_its_value() {
        let steps = vec![StepResult {
            order: 1,
            service_name: "UserService".into(),
            function_name: "GetUser".into(),
            success: true,
            value: Some(serde_json::json!({"userId": "u1"})),
            error: None,
            duration: Duration::from_millis(5),
            retry_count: 0,
            used_fallback: false,
            error_category: ErrorCategory::Unknown,
        }];
        let agg = ExecutionResult::aggregate(&steps);
        assert_eq!(agg, serde_json::json!({"userId": "u1"}));
    }

    #[test]
    fn aggregate_multi_step_returns_step_views() {
        let steps = vec![
            StepResult {
                order: 1,
                service_name: "A".into(),
                function_name: "F".into(),
                success: true,
                value: Some(serde_json::json!(1)),
                error: None,
                duration: Duration::from_millis(1),
                retry_count: 0,
                used_fallback: false,
                error_category: ErrorCategory::Unknown,
            },
            StepResult {
                order: 2,
                service_name: "B".into(),
                function_name: "G".into(),
                success: true,
                value: Some(serde_json::json!(2)),
                error: None,
                duration: Duration::from_millis(1),
                retry_count: 0,
                used_fallback: false,
                error_category: ErrorCategory::Unknown,
            },
        ];
        let agg = ExecutionResult::aggregate(&steps);
        assert!(agg.is_array());
        assert_eq!(agg.as_array().unwrap().len(), 2);
    }
}
