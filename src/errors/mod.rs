//! Structured error type for the gateway's HTTP boundary.
//!
//! Every error that can reach a client crosses through [`GatewayError`],
//! which renders the RFC-7807-ish body and status code fixed by the
//! external interface design. Internal collaborators (resolver, cache,
//! retry, breaker, ...) return their own `thiserror` enums and get mapped
//! into a `GatewayError` at the admission/orchestrator boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Broad bucket a [`GatewayError`] falls into, used both for status-code
/// mapping and for audit/log categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    Guardrail,
    Quota,
    Validation,
    Execution,
    Internal,
}

/// Error kinds per §7 — named for what they mean to a caller, not for
/// the Rust type that produced them.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("missing or malformed Authorization header")]
    MissingToken,

    #[error("token verification failed: {0}")]
    InvalidToken(String),

    #[error("token is expired")]
    TokenExpired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("prompt injection detected: {0}")]
    PromptInjectionDetected(String),

    #[error("sensitive operation detected: {0}")]
    SensitiveOperationDetected(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("downstream call failed after exhausting retries: {0}")]
    DownstreamTransient(String),

    #[error("downstream call failed permanently: {0}")]
    DownstreamPermanent(String),

    #[error("request canceled by the client")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingToken | Self::InvalidToken(_) | Self::TokenExpired => ErrorCategory::Auth,
            Self::Forbidden(_) | Self::PromptInjectionDetected(_) | Self::SensitiveOperationDetected(_) => {
                ErrorCategory::Guardrail
            }
            Self::RateLimitExceeded { .. } => ErrorCategory::Quota,
            Self::Invalid(_) => ErrorCategory::Validation,
            Self::DownstreamTransient(_) | Self::DownstreamPermanent(_) | Self::Canceled => {
                ErrorCategory::Execution
            }
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) | Self::PromptInjectionDetected(_) | Self::SensitiveOperationDetected(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingToken | Self::InvalidToken(_) | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DownstreamTransient(_) | Self::DownstreamPermanent(_) => StatusCode::BAD_GATEWAY,
            Self::Canceled => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::MissingToken => "unauthorized",
            Self::InvalidToken(_) => "unauthorized",
            Self::TokenExpired => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::PromptInjectionDetected(_) => "prompt_injection_detected",
            Self::SensitiveOperationDetected(_) => "sensitive_operation_detected",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::DownstreamTransient(_) => "downstream_transient",
            Self::DownstreamPermanent(_) => "downstream_permanent",
            Self::Canceled => "canceled",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after_secs = match &self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            retry_after_secs,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_401() {
        assert_eq!(GatewayError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::InvalidToken("bad sig".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn rate_limit_exceeded_maps_to_429() {
        let err = GatewayError::RateLimitExceeded { retry_after_secs: 30 };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.category(), ErrorCategory::Quota);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = GatewayError::Forbidden("role check failed".into());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn prompt_injection_maps_to_400() {
        let err = GatewayError::PromptInjectionDetected("matched pattern".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
