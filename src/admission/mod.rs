//! Admission Pipeline (C12): composes the Token Verifier (C1), Guardrail
//! (C2), and Quota Keeper (C3) behind a single correlation id (I8) and
//! writes one audit record for every outcome, allowed or refused.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::audit::AuditSink;
use crate::auth::TokenVerifier;
use crate::errors::GatewayError;
use crate::guardrail::{self, RejectionKind};
use crate::protocol::{AuditAction, AuditRecord, Principal};
use crate::quota::{QuotaKeeper, QuotaVerdict};

#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub principal: Principal,
    pub correlation_id: String,
}

pub struct AdmissionPipeline {
    token_verifier: Arc<dyn TokenVerifier>,
    quota: Arc<QuotaKeeper>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionPipeline {
    pub fn new(token_verifier: Arc<dyn TokenVerifier>, quota: Arc<QuotaKeeper>, audit: Arc<dyn AuditSink>) -> Self {
        Self { token_verifier, quota, audit }
    }

    /// Runs C1 -> C2 -> C3 in order, short-circuiting on the first
    /// rejection. `correlation_id` is either the caller-supplied
    /// `X-Correlation-Id` or a freshly generated one (I8); it is attached
    /// to the audit record regardless of outcome.
    pub async fn admit(
        &self,
        bearer_token: &str,
        intent: &str,
        correlation_id: String,
        headers: &HeaderMap,
    ) -> Result<AdmissionOutcome, GatewayError> {
        let principal = match self.token_verifier.verify(bearer_token).await {
            Ok(p) => p,
            Err(err) => {
                self.record(None, intent, &correlation_id, headers, &err).await;
                return Err(err);
            }
        };

        if let guardrail::GuardrailVerdict::Reject { kind, reason } =
            guardrail::check(&principal.user_id, intent)
        {
            let err = match kind {
                RejectionKind::Invalid => GatewayError::Invalid(reason),
                RejectionKind::PromptInjectionDetected => GatewayError::PromptInjectionDetected(reason),
                RejectionKind::SensitiveOperationDetected => GatewayError::SensitiveOperationDetected(reason),
            };
            self.record(Some(&principal), intent, &correlation_id, headers, &err).await;
            return Err(err);
        }

        if let QuotaVerdict::Exceeded { retry_after_secs } = self.quota.check_and_consume(&principal.user_id) {
            let err = GatewayError::RateLimitExceeded { retry_after_secs };
            self.record(Some(&principal), intent, &correlation_id, headers, &err).await;
            return Err(err);
        }

        self.record_success(&principal, intent, &correlation_id, headers).await;
        Ok(AdmissionOutcome { principal, correlation_id })
    }

    async fn record(
        &self,
        principal: Option<&Principal>,
        intent: &str,
        correlation_id: &str,
        headers: &HeaderMap,
        err: &GatewayError,
    ) {
        let mut context = std::collections::HashMap::new();
        context.insert("correlationId".to_string(), serde_json::Value::String(correlation_id.to_string()));
        self.audit
            .record(AuditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: principal.map(|p| p.user_id.clone()).unwrap_or_else(|| "unknown".to_string()),
                action: AuditAction::Access,
                resource: intent.to_string(),
                method: "POST".to_string(),
                status_code: err.status().as_u16(),
                success: false,
                error_message: Some(err.to_string()),
                timestamp: chrono::Utc::now(),
                ip_address: client_ip(headers),
                context,
            })
            .await;
    }

    async fn record_success(&self, principal: &Principal, intent: &str, correlation_id: &str, headers: &HeaderMap) {
        let mut context = std::collections::HashMap::new();
        context.insert("correlationId".to_string(), serde_json::Value::String(correlation_id.to_string()));
        self.audit
            .record(AuditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: principal.user_id.clone(),
                action: AuditAction::Access,
                resource: intent.to_string(),
                method: "POST".to_string(),
                status_code: 200,
                success: true,
                error_message: None,
                timestamp: chrono::Utc::now(),
                ip_address: client_ip(headers),
                context,
            })
            .await;
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}
