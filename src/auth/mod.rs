//! Token Verifier (C1): validates the caller's bearer token and produces
//! a [`Principal`] for the rest of the pipeline.
//!
//! `TokenVerifier` is a trait so a test harness or an alternate identity
//! provider can be substituted; [`JwtTokenVerifier`] is the default,
//! using `jsonwebtoken` against a configured issuer/audience/secret.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::errors::GatewayError;
use crate::protocol::Principal;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, bearer_token: &str) -> Result<Principal, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    oid: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    exp: Option<usize>,
}

pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, bearer_token: &str) -> Result<Principal, GatewayError> {
        let token = bearer_token
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::MissingToken)?
            .trim();
        if token.is_empty() {
            return Err(GatewayError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
                _ => GatewayError::InvalidToken(e.to_string()),
            }
        })?;

        // Claim precedence: `sub` first, falling back to `oid` (Azure AD
        // style tokens carry the user identifier there instead).
        let user_id = data
            .claims
            .sub
            .or(data.claims.oid)
            .ok_or_else(|| GatewayError::InvalidToken("token has neither sub nor oid claim".into()))?;

        Ok(Principal { user_id, roles: data.claims.roles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        iss: String,
        aud: String,
        exp: usize,
        roles: Vec<String>,
    }

    fn make_token(secret: &str, sub: &str, iss: &str, aud: &str, exp_offset_secs: i64) -> String {
        let claims = TestClaims {
            sub: sub.into(),
            iss: iss.into(),
            aud: aud.into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
            roles: vec!["user".into()],
        };
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .unwrap()
    }

    #[tokio::test]
    async fn valid_token_produces_principal() {
        let verifier = JwtTokenVerifier::new("secret", "gateway", "clients");
        let token = make_token("secret", "u1", "gateway", "clients", 3600);
        let principal = verifier.verify(&format!("Bearer {token}")).await.unwrap();
        assert_eq!(principal.user_id, "u1");
        assert!(principal.has_role("user"));
    }

    #[tokio::test]
    async fn missing_bearer_prefix_is_rejected() {
        let verifier = JwtTokenVerifier::new("secret", "gateway", "clients");
        let result = verifier.verify("not-a-bearer-token").await;
        assert!(matches!(result, Err(GatewayError::MissingToken)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let verifier = JwtTokenVerifier::new("secret", "gateway", "clients");
        let token = make_token("secret", "u1", "gateway", "clients", -3600);
        let result = verifier.verify(&format!("Bearer {token}")).await;
        assert!(matches!(result, Err(GatewayError::TokenExpired)));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let verifier = JwtTokenVerifier::new("secret", "gateway", "clients");
        let token = make_token("other-secret", "u1", "gateway", "clients", 3600);
        let result = verifier.verify(&format!("Bearer {token}")).await;
        assert!(matches!(result, Err(GatewayError::InvalidToken(_))));
    }
}
