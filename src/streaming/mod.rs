//! Streaming Adapter (C10): a typed sequence of execution events,
//! delivered to callers as newline-delimited SSE frames (see
//! [`crate::api`]).
//!
//! Events are pushed onto an unbounded channel as the orchestrator (C9)
//! walks the plan; the HTTP layer turns the receiver into an
//! `async_stream` of `"event: <type>\ndata: <json>\n\n"` frames.

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ExecutionStarted,
    PlanGenerated,
    StepStarted,
    /// Reserved: may be emitted by long-running step operations.
    StepProgress,
    StepCompleted,
    StepFailed,
    ExecutionCompleted,
    ExecutionFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub event_type: EventType,
    /// 0 for execution-level events.
    pub step_order: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u128,
    pub correlation_id: String,
}

impl StreamEvent {
    pub fn execution_level(
        event_type: EventType,
        data: serde_json::Value,
        duration_ms: u128,
        correlation_id: &str,
    ) -> Self {
        Self {
            event_type,
            step_order: 0,
            service_name: None,
            function_name: None,
            data,
            timestamp: chrono::Utc::now(),
            duration_ms,
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn step_level(
        event_type: EventType,
        step_order: u32,
        service_name: &str,
        function_name: &str,
        data: serde_json::Value,
        duration_ms: u128,
        correlation_id: &str,
    ) -> Self {
        Self {
            event_type,
            step_order,
            service_name: Some(service_name.to_string()),
            function_name: Some(function_name.to_string()),
            data,
            timestamp: chrono::Utc::now(),
            duration_ms,
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Emits [`StreamEvent`]s to whoever is consuming this execution's
/// stream. A no-op sink (dropped receiver) is fine — the orchestrator
/// does not block or fail if nobody is listening.
#[derive(Clone)]
pub struct EventEmitter {
    sender: UnboundedSender<StreamEvent>,
}

impl EventEmitter {
    pub fn channel() -> (Self, UnboundedReceiver<StreamEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Silently drops events that have no receiver; the orchestrator run
    /// itself never depends on whether anyone is listening.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_arrive_in_order() {
        let (emitter, mut receiver) = EventEmitter::channel();
        emitter.emit(StreamEvent::execution_level(
            EventType::ExecutionStarted,
            serde_json::json!({}),
            0,
            "corr-1",
        ));
        emitter.emit(StreamEvent::execution_level(
            EventType::PlanGenerated,
            serde_json::json!({}),
            1,
            "corr-1",
        ));

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::ExecutionStarted);
        assert_eq!(second.event_type, EventType::PlanGenerated);
    }

    #[test]
    fn emit_with_no_receiver_does_not_panic() {
        let (emitter, receiver) = EventEmitter::channel();
        drop(receiver);
        emitter.emit(StreamEvent::execution_level(EventType::ExecutionStarted, serde_json::json!({}), 0, "c"));
    }
}
