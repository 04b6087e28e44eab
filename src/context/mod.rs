//! Execution context: the resolver's lookup environment for one execution.
//!
//! An `ExecutionContext` is created fresh per execution and never shared
//! across requests (§5) — it is mutated only by the owning orchestrator
//! task as steps complete.

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::StepResult;

/// Mutable, append-only (for `step_results`) lookup environment threaded
/// through one plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub user_id: String,
    pub intent: String,
    /// Completed step results so far, indexed by `order`.
    step_results: HashMap<u32, StepResult>,
    /// Caller-supplied context variables (from the request body's
    /// `context` field), available as `${contextKey}` in addition to the
    /// built-ins `userId`/`intent`/`stepN`.
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            intent: intent.into(),
            step_results: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Appends a completed step's result to the context.
    pub fn record(&mut self, result: StepResult) {
        self.step_results.insert(result.order, result);
    }

    /// Looks up a prior step's result by its 1-indexed `order`.
    ///
    /// Returns `None` both for steps that have not executed yet and for
    /// `order` values the plan never contained — either way the resolver
    /// cannot fabricate a value (§4.5).
    pub fn step(&self, order: u32) -> Option<&StepResult> {
        self.step_results.get(&order)
    }

    /// All step results recorded so far, sorted by order, for building the
    /// final report.
    pub fn all_steps(&self) -> Vec<&StepResult> {
        let mut values: Vec<&StepResult> = self.step_results.values().collect();
        values.sort_by_key(|s| s.order);
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCategory;
    use std::time::Duration;

    fn ok_result(order: u32, value: Value) -> StepResult {
        StepResult {
            order,
            service_name: "Svc".into(),
            function_name: "Fn".into(),
            success: true,
            value: Some(value),
            error: None,
            duration: Duration::from_millis(1),
            retry_count: 0,
            used_fallback: false,
            error_category: ErrorCategory::Unknown,
        }
    }

    #[test]
    fn step_lookup_misses_before_recording() {
        let ctx = ExecutionContext::new("u1", "do a thing");
        assert!(ctx.step(1).is_none());
    }

    #[test]
    fn step_lookup_hits_after_recording() {
        let mut ctx = ExecutionContext::new("u1", "do a thing");
        ctx.record(ok_result(1, serde_json::json!({"a": 1})));
        assert!(ctx.step(1).is_some());
        assert!(ctx.step(2).is_none());
    }

    #[test]
    fn all_steps_are_sorted_by_order() {
        let mut ctx = ExecutionContext::new("u1", "intent");
        ctx.record(ok_result(2, serde_json::json!(2)));
        ctx.record(ok_result(1, serde_json::json!(1)));
        let orders: Vec<u32> = ctx.all_steps().iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }
}
