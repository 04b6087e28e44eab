//! Audit Sink (C11): append-only record of every admitted/rejected
//! request, queryable by user or resource.
//!
//! `AuditSink` is a trait so a durable backend (not in scope — see
//! Non-goals) can be substituted later without touching callers.
//! [`InMemoryAuditSink`] is the process-lifetime default, backed by a
//! `tokio::sync::RwLock<Vec<_>>`, consistent with how the rest of this
//! crate guards small pieces of shared state.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::protocol::AuditRecord;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
    async fn query_by_user(&self, user_id: &str, limit: usize) -> Vec<AuditRecord>;
    async fn query_by_resource(&self, resource: &str, limit: usize) -> Vec<AuditRecord>;
}

#[derive(Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.records.write().await.push(record);
    }

    async fn query_by_user(&self, user_id: &str, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn query_by_resource(&self, resource: &str, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .filter(|r| r.resource == resource)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AuditAction;

    fn sample(user_id: &str, resource: &str) -> AuditRecord {
        AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            action: AuditAction::Execute,
            resource: resource.into(),
            method: "POST".into(),
            status_code: 200,
            success: true,
            error_message: None,
            timestamp: chrono::Utc::now(),
            ip_address: None,
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn query_by_user_returns_most_recent_first() {
        let sink = InMemoryAuditSink::new();
        sink.record(sample("u1", "orders")).await;
        sink.record(sample("u1", "users")).await;
        let records = sink.query_by_user("u1", 10).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].resource, "users");
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let sink = InMemoryAuditSink::new();
        for _ in 0..5 {
            sink.record(sample("u1", "orders")).await;
        }
        assert_eq!(sink.query_by_user("u1", 2).await.len(), 2);
    }

    #[tokio::test]
    async fn query_by_resource_filters_across_users() {
        let sink = InMemoryAuditSink::new();
        sink.record(sample("u1", "orders")).await;
        sink.record(sample("u2", "orders")).await;
        sink.record(sample("u1", "users")).await;
        assert_eq!(sink.query_by_resource("orders", 10).await.len(), 2);
    }
}
