//! Planner: turns an intent string into a [`Plan`] of ordered [`Step`]s.
//!
//! The orchestration core (C9) only depends on the [`Planner`] trait — a
//! caller is free to swap in an LLM-backed planner. [`RuleBasedPlanner`]
//! is the process-lifetime default, pattern-matching a small set of known
//! intents so the engine is exercisable end to end without an external
//! collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::protocol::{Plan, Principal, Step};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no known plan for intent '{0}'")]
    UnrecognizedIntent(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, intent: &str, principal: &Principal) -> Result<Plan, PlanningError>;
}

static LOOK_UP_USER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^look up user\s+(\S+)$").expect("valid regex"));
static GET_ORDER_THEN_NOTIFY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^get order\s+(\S+)\s+then notify\s+(\S+)$").expect("valid regex"));

/// Pattern-matches a handful of known intent shapes into multi-step
/// plans. Not a general natural-language planner — a stand-in so the
/// orchestration core can be driven end to end without one.
#[derive(Default)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Planner for RuleBasedPlanner {
    async fn plan(&self, intent: &str, principal: &Principal) -> Result<Plan, PlanningError> {
        let trimmed = intent.trim();

        if let Some(caps) = LOOK_UP_USER.captures(trimmed) {
            let user_id = caps[1].to_string();
            let mut parameters = HashMap::new();
            parameters.insert("userId".to_string(), serde_json::Value::String(user_id));
            return Ok(Plan {
                id: uuid::Uuid::new_v4().to_string(),
                intent: intent.to_string(),
                steps: vec![Step {
                    order: 1,
                    service_name: "UserService".to_string(),
                    function_name: "GetUser".to_string(),
                    description: Some("look up the requested user".to_string()),
                    parameters,
                    fallback_value: None,
                }],
            });
        }

        if let Some(caps) = GET_ORDER_THEN_NOTIFY.captures(trimmed) {
            let order_id = caps[1].to_string();
            let notify_service = caps[2].to_string();

            let mut order_params = HashMap::new();
            order_params.insert("orderId".to_string(), serde_json::Value::String(order_id));

            let mut notify_params = HashMap::new();
            notify_params.insert("userId".to_string(), serde_json::Value::String(principal.user_id.clone()));
            notify_params.insert(
                "order".to_string(),
                serde_json::Value::String("${step1}".to_string()),
            );

            return Ok(Plan {
                id: uuid::Uuid::new_v4().to_string(),
                intent: intent.to_string(),
                steps: vec![
                    Step {
                        order: 1,
                        service_name: "OrderService".to_string(),
                        function_name: "GetOrder".to_string(),
                        description: Some("fetch the order".to_string()),
                        parameters: order_params,
                        fallback_value: None,
                    },
                    Step {
                        order: 2,
                        service_name: notify_service,
                        function_name: "Notify".to_string(),
                        description: Some("notify the downstream service of the order".to_string()),
                        parameters: notify_params,
                        fallback_value: None,
                    },
                ],
            });
        }

        Err(PlanningError::UnrecognizedIntent(intent.to_string()))
    }
}
