//! Retry/Timeout Policy (C6): wraps a downstream call with a per-service
//! timeout and exponential-backoff retries, gated on error classification
//! so permanent failures never get retried.
//!
//! A policy struct plus a generic `execute()` over an async closure,
//! exponential backoff via `current_backoff * backoff_factor`, a timeout
//! wrapping the whole attempt, and a [`RetryAttempt`] history alongside
//! the success/failure outcome.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::protocol::{ErrorCategory, RetryAttempt};

/// Per-service resilience configuration (§4.3).
///
/// `timeout` bounds each individual attempt; callers apply it around
/// `operation` themselves (typically via `tokio::time::timeout`, mapping
/// an elapsed timeout into their own error type) so that timing out still
/// produces a concrete `E` the classifier can categorize, rather than
/// this generic executor needing to fabricate one.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_factor: f64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
            backoff_factor: 2.0,
            timeout: Duration::from_secs(30),
        }
    }
}

const TRANSIENT_MESSAGE_PATTERNS: &[&str] =
    &["timeout", "unavailable", "connection", "transient", "temporary"];
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 503, 504];
const PERMANENT_MESSAGE_PATTERNS: &[&str] = &["unauthorized", "forbidden", "notfound", "invalid"];
const PERMANENT_STATUSES: &[u16] = &[400, 401, 403, 404];

/// Classifies an error's message and/or HTTP status per §4.4: message
/// pattern match OR status-set membership, checked transient-first, then
/// permanent, defaulting to `Unknown` (never retried, matching the
/// teacher's conservative default for unrecognized recovery strategies).
pub fn classify(message: &str, http_status: Option<u16>) -> ErrorCategory {
    let lower = message.to_lowercase();
    let is_transient = TRANSIENT_MESSAGE_PATTERNS.iter().any(|p| lower.contains(p))
        || http_status.is_some_and(|s| TRANSIENT_STATUSES.contains(&s));
    if is_transient {
        return ErrorCategory::Transient;
    }
    let is_permanent = PERMANENT_MESSAGE_PATTERNS.iter().any(|p| lower.contains(p))
        || http_status.is_some_and(|s| PERMANENT_STATUSES.contains(&s));
    if is_permanent {
        return ErrorCategory::Permanent;
    }
    ErrorCategory::Unknown
}

/// Outcome of [`RetryExecutor::execute`]: success with a value, or
/// exhaustion with the final error plus the full attempt history.
pub enum Outcome<T, E> {
    Success { value: T, retry_history: Vec<RetryAttempt> },
    Exhausted { error: E, retry_history: Vec<RetryAttempt>, category: ErrorCategory },
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Runs `operation` (classifying failures with `classify_err`),
    /// retrying transient failures with exponential backoff up to
    /// `max_retries` times. `operation` is expected to enforce
    /// `self.policy.timeout` itself per attempt.
    pub async fn execute<T, E, F, Fut>(
        &self,
        service: &str,
        classify_err: impl Fn(&E) -> (ErrorCategory, Option<u16>),
        mut operation: F,
    ) -> Outcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        let mut current_backoff = (self.policy.backoff_ms as f64 * self.policy.backoff_factor) as u64;
        let mut history = Vec::new();

        loop {
            let result = operation().await;

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(service, attempt, "retry succeeded");
                    }
                    return Outcome::Success { value, retry_history: history };
                }
                Err(e) => {
                    let (category, http_status) = classify_err(&e);
                    if category != ErrorCategory::Transient || attempt > self.policy.max_retries {
                        warn!(service, attempt, error = %e, "not retrying");
                        return Outcome::Exhausted { error: e, retry_history: history, category };
                    }
                    history.push(RetryAttempt {
                        attempt_number: attempt,
                        timestamp: chrono::Utc::now(),
                        error_message: e.to_string(),
                        wait_before_retry: Duration::from_millis(current_backoff),
                        http_status,
                    });
                    warn!(service, attempt, backoff_ms = current_backoff, error = %e, "retrying");
                    sleep(Duration::from_millis(current_backoff)).await;
                    current_backoff = (current_backoff as f64 * self.policy.backoff_factor) as u64;
                    attempt += 1;
                }
            }
        }
    }
}
