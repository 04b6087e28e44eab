//! Plan validation: checks a [`Plan`] before it is admitted to execution.
//!
//! A `thiserror` enum of specific violations plus a `validate_plan` that
//! accumulates every violation found rather than stopping at the first.
//! The one invariant checked here: step `order` values form a gap-free
//! `1..=N` sequence (I1).

use std::collections::HashSet;

use thiserror::Error;

use crate::protocol::{Plan, Step};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("plan has no steps")]
    EmptyPlan,

    #[error("step order {order} is duplicated")]
    DuplicateOrder { order: u32 },

    #[error("step order must start at 1 and have no gaps, found {found:?}")]
    NonContiguousOrder { found: Vec<u32> },

    #[error("step at order {order}: service_name must not be empty")]
    EmptyServiceName { order: u32 },

    #[error("step at order {order}: function_name must not be empty")]
    EmptyFunctionName { order: u32 },
}

/// Validates `plan` against invariant I1 and basic step field sanity,
/// accumulating every violation found rather than stopping at the first.
pub fn validate_plan(plan: &Plan) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if plan.steps.is_empty() {
        return Err(vec![ValidationError::EmptyPlan]);
    }

    check_order_sequence(&plan.steps, &mut errors);

    for step in &plan.steps {
        if step.service_name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName { order: step.order });
        }
        if step.function_name.trim().is_empty() {
            errors.push(ValidationError::EmptyFunctionName { order: step.order });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_order_sequence(steps: &[Step], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.order) {
            errors.push(ValidationError::DuplicateOrder { order: step.order });
        }
    }

    let mut orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    orders.dedup();
    let expected: Vec<u32> = (1..=orders.len() as u32).collect();
    if orders != expected {
        errors.push(ValidationError::NonContiguousOrder { found: orders });
    }
}
