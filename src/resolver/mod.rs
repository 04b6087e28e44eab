//! Variable Resolver (C7): expands `${...}` references inside step
//! parameters against the current [`crate::context::ExecutionContext`].
//!
//! Forward-only visibility (invariant I4) falls out of the data structure
//! itself: `ExecutionContext::step` can only return results for steps that
//! have already been recorded, and the orchestrator only records a step
//! after it completes and only resolves the next step's parameters
//! afterwards — there is no way for a reference to observe a result from
//! its own step or a later one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::context::ExecutionContext;

static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.\[\]]+)\}").expect("valid regex"));

/// Resolves every `${...}` reference reachable from `value`, recursing
/// into arrays and objects. Strings that are *entirely* one reference
/// (e.g. `"${step1.body.id}"`) splice in the referenced value verbatim,
/// preserving its original JSON type; references embedded in a larger
/// string are stringified in place.
pub fn resolve(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &ExecutionContext) -> Value {
    if let Some(whole) = whole_string_reference(s) {
        return lookup(whole, ctx).unwrap_or_else(|| {
            warn!(reference = %whole, "unresolved variable reference, left verbatim");
            Value::String(s.to_string())
        });
    }

    let mut unresolved = false;
    let replaced = REFERENCE_RE.replace_all(s, |caps: &regex::Captures| {
        let path = &caps[1];
        match lookup(path, ctx) {
            Some(v) => value_to_fragment(&v),
            None => {
                unresolved = true;
                caps[0].to_string()
            }
        }
    });
    if unresolved {
        warn!(source = %s, "string contains unresolved variable references");
    }
    Value::String(replaced.into_owned())
}

/// If `s` is exactly one `${...}` reference with nothing else around it,
/// returns the inner path.
fn whole_string_reference(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if !trimmed.starts_with("${") || !trimmed.ends_with('}') {
        return None;
    }
    let inner = &trimmed[2..trimmed.len() - 1];
    if inner.contains("${") {
        return None;
    }
    Some(inner)
}

fn value_to_fragment(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Navigates a dot/bracket path against the context's built-ins
/// (`userId`, `intent`, `stepN`) and caller-supplied `variables`/context
/// values. Returns `None` when any segment fails to resolve — the caller
/// never fabricates a value.
fn lookup(path: &str, ctx: &ExecutionContext) -> Option<Value> {
    let mut segments = path.split('.');
    let head = segments.next()?;

    let mut current = if head.eq_ignore_ascii_case("userId") {
        Value::String(ctx.user_id.clone())
    } else if head.eq_ignore_ascii_case("intent") {
        Value::String(ctx.intent.clone())
    } else if let Some(order) = step_order(head) {
        ctx.step(order)?.value.clone()?
    } else if let Some(v) = ctx.variables.get(head) {
        v.clone()
    } else {
        return None;
    };

    for segment in segments {
        current = navigate_one(&current, segment)?;
    }
    Some(current)
}

/// Parses `stepN` (N a positive integer) into its numeric order.
fn step_order(segment: &str) -> Option<u32> {
    let rest = segment.strip_prefix("step").or_else(|| segment.strip_prefix("Step"))?;
    rest.parse().ok()
}

fn navigate_one(current: &Value, segment: &str) -> Option<Value> {
    if let Some(index_str) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let index: usize = index_str.parse().ok()?;
        return current.as_array()?.get(index).cloned();
    }
    match current {
        Value::Object(map) => {
            // Object properties from step results/built-ins are matched
            // case-insensitively; this is the only case where we do so —
            // caller-supplied `variables` keys beneath this point are
            // matched case-sensitively via plain `get`.
            if let Some(v) = map.get(segment) {
                return Some(v.clone());
            }
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(segment))
                .map(|(_, v)| v.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCategory as StepErrorCategory, StepResult};
    use std::time::Duration;

    fn ctx_with_step1(value: Value) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("u1", "do a thing");
        ctx.record(StepResult {
            order: 1,
            service_name: "UserService".into(),
            function_name: "GetUser".into(),
            success: true,
            value: Some(value),
            error: None,
            duration: Duration::from_millis(1),
            retry_count: 0,
            used_fallback: false,
            error_category: StepErrorCategory::Unknown,
        });
        ctx
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        let ctx = ctx_with_step1(serde_json::json!({"value": {"id": 42}}));
        let resolved = resolve(&Value::String("${step1.value}".into()), &ctx);
        assert_eq!(resolved, serde_json::json!({"id": 42}));
    }

    #[test]
    fn embedded_reference_is_stringified() {
        let ctx = ctx_with_step1(serde_json::json!({"value": {"id": 42}}));
        let resolved = resolve(&Value::String("user-${step1.value.id}".into()), &ctx);
        assert_eq!(resolved, Value::String("user-42".into()));
    }

    #[test]
    fn builtin_user_id_and_intent() {
        let ctx = ExecutionContext::new("u1", "look up order");
        assert_eq!(resolve(&Value::String("${userId}".into()), &ctx), Value::String("u1".into()));
        assert_eq!(
            resolve(&Value::String("${intent}".into()), &ctx),
            Value::String("look up order".into())
        );
    }

    #[test]
    fn unresolved_reference_is_left_verbatim() {
        let ctx = ExecutionContext::new("u1", "intent");
        let resolved = resolve(&Value::String("${step99.value}".into()), &ctx);
        assert_eq!(resolved, Value::String("${step99.value}".into()));
    }

    #[test]
    fn object_property_lookup_is_case_insensitive() {
        let ctx = ctx_with_step1(serde_json::json!({"Value": {"UserId": "abc"}}));
        let resolved = resolve(&Value::String("${step1.value.userid}".into()), &ctx);
        assert_eq!(resolved, Value::String("abc".into()));
    }

    #[test]
    fn context_variable_keys_are_case_sensitive() {
        let mut ctx = ExecutionContext::new("u1", "intent");
        ctx.variables.insert("OrderId".into(), Value::String("o-1".into()));
        assert_eq!(
            resolve(&Value::String("${OrderId}".into()), &ctx),
            Value::String("o-1".into())
        );
        let unresolved = resolve(&Value::String("${orderid}".into()), &ctx);
        assert_eq!(unresolved, Value::String("${orderid}".into()));
    }
}
