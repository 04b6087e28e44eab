//! Execution limits: a safety net bounding plan size and total retry
//! volume, independent of any single step's own [`crate::retry::RetryPolicy`].
//!
//! A config struct with `default`/`from_env`/`strict`/`relaxed` presets, a
//! `validate_limits` accumulator, and an atomic [`RetryCounter`] for
//! runtime enforcement. No `max_parallel` setting, since plan execution
//! here is strictly sequential (§5).

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_STEPS: usize = 100;
pub const DEFAULT_MAX_RETRIES_TOTAL: u32 = 50;
pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 300;
pub const DEFAULT_MAX_STEP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_steps: usize,
    pub max_retries_total: u32,
    pub max_execution_time: Duration,
    pub max_step_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_retries_total: DEFAULT_MAX_RETRIES_TOTAL,
            max_execution_time: Duration::from_secs(DEFAULT_MAX_EXECUTION_SECS),
            max_step_timeout: Duration::from_secs(DEFAULT_MAX_STEP_TIMEOUT_SECS),
        }
    }
}

impl ExecutionLimits {
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(val) = std::env::var("GATEWAY_MAX_STEPS") {
            if let Ok(n) = val.parse() {
                limits.max_steps = n;
            }
        }
        if let Ok(val) = std::env::var("GATEWAY_MAX_RETRIES_TOTAL") {
            if let Ok(n) = val.parse() {
                limits.max_retries_total = n;
            }
        }
        if let Ok(val) = std::env::var("GATEWAY_MAX_EXECUTION_SECS") {
            if let Ok(n) = val.parse() {
                limits.max_execution_time = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("GATEWAY_MAX_STEP_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                limits.max_step_timeout = Duration::from_secs(n);
            }
        }

        limits
    }

    pub fn strict() -> Self {
        Self {
            max_steps: 10,
            max_retries_total: 5,
            max_execution_time: Duration::from_secs(30),
            max_step_timeout: Duration::from_secs(5),
        }
    }

    pub fn relaxed() -> Self {
        Self {
            max_steps: 500,
            max_retries_total: 200,
            max_execution_time: Duration::from_secs(3600),
            max_step_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
pub struct LimitValidationResult {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    pub actual_value: String,
    pub message: String,
}

/// Checks a plan's step count and worst-case retry volume against
/// `limits`, accumulating every violation rather than stopping at the
/// first.
pub fn validate_limits(step_count: usize, total_retries: u32, limits: &ExecutionLimits) -> LimitValidationResult {
    let mut violations = Vec::new();

    if step_count > limits.max_steps {
        violations.push(LimitViolation {
            limit_name: "max_steps".to_string(),
            limit_value: limits.max_steps.to_string(),
            actual_value: step_count.to_string(),
            message: format!("plan has {} steps, maximum allowed is {}", step_count, limits.max_steps),
        });
    }

    if total_retries > limits.max_retries_total {
        violations.push(LimitViolation {
            limit_name: "max_retries_total".to_string(),
            limit_value: limits.max_retries_total.to_string(),
            actual_value: total_retries.to_string(),
            message: format!(
                "plan could retry up to {} times, maximum allowed is {}",
                total_retries, limits.max_retries_total
            ),
        });
    }

    LimitValidationResult { passed: violations.is_empty(), violations }
}

/// Runtime tripwire for total retries across a plan execution,
/// independent of each step's own per-service retry budget.
#[derive(Debug, Default)]
pub struct RetryCounter {
    count: std::sync::atomic::AtomicU32,
    limit: u32,
}

impl RetryCounter {
    pub fn new(limit: u32) -> Self {
        Self { count: std::sync::atomic::AtomicU32::new(0), limit }
    }

    /// Increments the counter and reports whether the plan is still
    /// within its retry budget.
    pub fn try_increment(&self) -> bool {
        let current = self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        current < self.limit
    }

    pub fn current(&self) -> u32 {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_constants() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_steps, 100);
        assert_eq!(limits.max_retries_total, 50);
    }

    #[test]
    fn strict_limits_are_tighter() {
        let limits = ExecutionLimits::strict();
        assert_eq!(limits.max_steps, 10);
    }

    #[test]
    fn validate_limits_passes_within_bounds() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(50, 20, &limits);
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn validate_limits_flags_step_count_violation() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(150, 20, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_steps");
    }

    #[test]
    fn validate_limits_flags_retry_volume_violation() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(10, 100, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_retries_total");
    }

    #[test]
    fn retry_counter_trips_after_limit() {
        let counter = RetryCounter::new(3);
        assert!(counter.try_increment());
        assert!(counter.try_increment());
        assert!(counter.try_increment());
        assert!(!counter.try_increment());
        assert_eq!(counter.current(), 4);
    }
}
