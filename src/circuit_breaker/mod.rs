//! Circuit Breaker Table (C5): one independent breaker per downstream
//! service name, guarding the Step Executor against hammering a service
//! that is already failing.
//!
//! State transitions (invariant I5) are monotonic within a single
//! evaluation: `Closed -> Open` on crossing the failure threshold,
//! `Open -> HalfOpen` after the timeout elapses, `HalfOpen -> Closed` on
//! crossing the success threshold, `HalfOpen -> Open` on any failure.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::protocol::BreakerState;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

pub struct CircuitBreakerTable {
    breakers: DashMap<String, Mutex<Breaker>>,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_timeout: Duration,
}

impl Default for CircuitBreakerTable {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_SUCCESS_THRESHOLD, DEFAULT_HALF_OPEN_TIMEOUT)
    }
}

impl CircuitBreakerTable {
    pub fn new(failure_threshold: u32, success_threshold: u32, half_open_timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            success_threshold,
            half_open_timeout,
        }
    }

    /// Current state for `service`, lazily moving `Open` to `HalfOpen`
    /// once the timeout has elapsed. Unknown services are `Closed`.
    pub async fn state(&self, service: &str) -> BreakerState {
        let entry = self.breakers.entry(service.to_string()).or_default();
        let mut breaker = entry.lock().await;
        self.maybe_half_open(&mut breaker, service);
        breaker.state
    }

    /// Whether a call to `service` should be permitted right now.
    pub async fn allow(&self, service: &str) -> bool {
        !matches!(self.state(service).await, BreakerState::Open)
    }

    pub async fn record_success(&self, service: &str) {
        let entry = self.breakers.entry(service.to_string()).or_default();
        let mut breaker = entry.lock().await;
        self.maybe_half_open(&mut breaker, service);
        breaker.consecutive_failures = 0;
        match breaker.state {
            BreakerState::Closed => {}
            BreakerState::HalfOpen => {
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= self.success_threshold {
                    breaker.state = BreakerState::Closed;
                    breaker.consecutive_successes = 0;
                    breaker.opened_at = None;
                    info!(service, "circuit breaker closed after successful probes");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self, service: &str) {
        let entry = self.breakers.entry(service.to_string()).or_default();
        let mut breaker = entry.lock().await;
        self.maybe_half_open(&mut breaker, service);
        breaker.consecutive_successes = 0;
        match breaker.state {
            BreakerState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    warn!(service, "circuit breaker opened after repeated failures");
                }
            }
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
                warn!(service, "circuit breaker reopened after a probe failure");
            }
            BreakerState::Open => {}
        }
    }

    pub async fn reset(&self, service: &str) {
        self.breakers.insert(service.to_string(), Mutex::new(Breaker::default()));
    }

    fn maybe_half_open(&self, breaker: &mut Breaker, service: &str) {
        if breaker.state == BreakerState::Open {
            if let Some(opened_at) = breaker.opened_at {
                if opened_at.elapsed() >= self.half_open_timeout {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.consecutive_successes = 0;
                    info!(service, "circuit breaker half-open, probing");
                }
            }
        }
    }
}
