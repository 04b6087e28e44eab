//! Step Executor (C8): invokes one downstream operation under the
//! circuit breaker (C5) and retry/timeout policy (C6), classifies
//! errors, and applies the step's fallback.

pub mod http;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::protocol::{Step, StepResult};

/// Contract for a downstream operation invoker. Given a resolved
/// `(serviceName, functionName, parameters)` and the caller's bearer
/// token (token propagation, P8), returns the operation's result or a
/// classified [`http::DownstreamError`].
#[async_trait]
pub trait DownstreamServiceClient: Send + Sync {
    async fn call(
        &self,
        service_name: &str,
        function_name: &str,
        parameters: &serde_json::Value,
        bearer_token: &str,
    ) -> Result<serde_json::Value, http::DownstreamError>;
}

/// Executes one [`Step`] to completion, per §4.6's procedure. Never
/// raises — every outcome, including an unrecoverable internal error, is
/// represented as a [`StepResult`] value (the design notes' "result
/// plumbing" principle).
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &mut ExecutionContext, bearer_token: &str) -> StepResult;
}
