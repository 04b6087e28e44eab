//! HTTP surface (§6): axum router exposing intent execution, planning,
//! and streaming endpoints plus a health check.
//!
//! Follows the common SSE-over-axum pattern: an `async_stream` generator
//! turned into `Sse` frames.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::admission::AdmissionPipeline;
use crate::errors::GatewayError;
use crate::orchestrator::Orchestrator;
use crate::protocol::Plan;
use crate::streaming::EventEmitter;

pub struct AppState {
    pub admission: Arc<AdmissionPipeline>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/intent/execute", post(execute_intent))
        .route("/api/intent/plan", post(plan_intent))
        .route("/api/intent/stream/:intent", get(stream_intent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct IntentRequest {
    intent: String,
}

#[derive(Serialize)]
struct PlanResponse {
    plan: Plan,
}

fn correlation_id_of(headers: &HeaderMap) -> String {
    headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bearer_token_of(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Every response, success or failure, carries the correlation id it was
/// admitted under plus a fresh per-request trace id (I8).
fn with_tracing_headers(mut response: Response, correlation_id: &str, trace_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert("X-Correlation-Id", value);
    }
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert("X-Trace-Id", value);
    }
    response
}

async fn execute_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IntentRequest>,
) -> Response {
    let correlation_id = correlation_id_of(&headers);
    let trace_id = Uuid::new_v4().to_string();
    let token = bearer_token_of(&headers);

    let outcome = match state.admission.admit(&token, &body.intent, correlation_id.clone(), &headers).await {
        Ok(outcome) => outcome,
        Err(err) => return with_tracing_headers(err.into_response(), &correlation_id, &trace_id),
    };

    match state.orchestrator.execute(&body.intent, &outcome.principal, &token, &correlation_id).await {
        Ok(result) => with_tracing_headers(Json(result).into_response(), &correlation_id, &trace_id),
        Err(err) => {
            with_tracing_headers(GatewayError::Internal(err.to_string()).into_response(), &correlation_id, &trace_id)
        }
    }
}

async fn plan_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<IntentRequest>,
) -> Response {
    let correlation_id = correlation_id_of(&headers);
    let trace_id = Uuid::new_v4().to_string();
    let token = bearer_token_of(&headers);

    let outcome = match state.admission.admit(&token, &body.intent, correlation_id.clone(), &headers).await {
        Ok(outcome) => outcome,
        Err(err) => return with_tracing_headers(err.into_response(), &correlation_id, &trace_id),
    };

    match state.orchestrator.plan(&body.intent, &outcome.principal).await {
        Ok(plan) => with_tracing_headers(Json(PlanResponse { plan }).into_response(), &correlation_id, &trace_id),
        Err(err) => {
            with_tracing_headers(GatewayError::Invalid(err.to_string()).into_response(), &correlation_id, &trace_id)
        }
    }
}

async fn stream_intent(
    State(state): State<Arc<AppState>>,
    Path(intent): Path<String>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = correlation_id_of(&headers);
    let trace_id = Uuid::new_v4().to_string();
    let token = bearer_token_of(&headers);

    let outcome = match state.admission.admit(&token, &intent, correlation_id.clone(), &headers).await {
        Ok(outcome) => outcome,
        Err(err) => return with_tracing_headers(err.into_response(), &correlation_id, &trace_id),
    };

    let (emitter, mut receiver) = EventEmitter::channel();
    let orchestrator = state.orchestrator.clone();
    let principal = outcome.principal.clone();
    let token_for_task = token.clone();
    let correlation_id_for_task = correlation_id.clone();
    tokio::spawn(async move {
        let _ = orchestrator
            .execute_streaming(&intent, &principal, &token_for_task, &correlation_id_for_task, emitter)
            .await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            let event_name = serde_json::to_value(event.event_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            yield Ok::<Event, std::convert::Infallible>(
                Event::default().event(event_name).data(data),
            );
        }
    };

    let response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    with_tracing_headers(response, &correlation_id, &trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_generated_when_absent() {
        let headers = HeaderMap::new();
        assert!(!correlation_id_of(&headers).is_empty());
    }

    #[test]
    fn correlation_id_is_echoed_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Correlation-Id", HeaderValue::from_static("corr-123"));
        assert_eq!(correlation_id_of(&headers), "corr-123");
    }
}
