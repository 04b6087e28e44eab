//! Environment-driven configuration: a single struct with a `from_env()`
//! constructor and documented defaults, no config file format.

use std::collections::HashMap;
use std::time::Duration;

use crate::retry::RetryPolicy;

const SERVICE_PREFIX: &str = "RESILIENCE_SERVICE__";
const SERVICE_DISCOVERY_PREFIX: &str = "SERVICE_DISCOVERY__";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub default_policy: RetryPolicy,
    /// Per-service overrides, keyed by service name, read from
    /// `RESILIENCE_SERVICE__<NAME>__{TIMEOUT_SECONDS,MAX_RETRIES,BACKOFF_MS}`.
    pub service_policies: HashMap<String, RetryPolicy>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub daily_limit: u32,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub plan_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub auth: AuthConfig,
    pub resilience: ResilienceConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    /// Base URLs for downstream services, keyed by service name, read
    /// from `SERVICE_DISCOVERY__<NAME>__URL`.
    pub service_urls: HashMap<String, String>,
    pub cors_allowed_origins: Vec<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            auth: AuthConfig {
                issuer: env_string("AUTH_ISSUER", "ai-gateway"),
                audience: env_string("AUTH_AUDIENCE", "ai-gateway-clients"),
                secret_key: env_string("AUTH_SECRET_KEY", "change-me-in-production"),
            },
            resilience: ResilienceConfig {
                default_policy: RetryPolicy {
                    timeout: Duration::from_secs(env_parse("RESILIENCE_DEFAULT_TIMEOUT_SECONDS", 30)),
                    max_retries: env_parse("RESILIENCE_DEFAULT_MAX_RETRIES", 3),
                    backoff_ms: env_parse("RESILIENCE_DEFAULT_BACKOFF_MS", 100),
                    backoff_factor: 2.0,
                },
                service_policies: service_policy_overrides(),
            },
            rate_limit: RateLimitConfig {
                enabled: env_parse("RATE_LIMIT_ENABLED", true),
                daily_limit: env_parse("RATE_LIMIT_DAILY_LIMIT", 1000),
            },
            cache: CacheConfig {
                max_entries: env_parse("CACHE_MAX_ENTRIES", 1000),
                max_bytes: env_parse("CACHE_MAX_BYTES", 100 * 1024 * 1024),
                plan_ttl: Duration::from_secs(env_parse("CACHE_PLAN_TTL_SECONDS", 300)),
            },
            service_urls: service_discovery_urls(),
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Collects `RESILIENCE_SERVICE__<NAME>__{TIMEOUT_SECONDS,MAX_RETRIES,BACKOFF_MS}`
/// into per-service [`RetryPolicy`] overrides, starting from the default
/// policy's values for any field not explicitly overridden.
fn service_policy_overrides() -> HashMap<String, RetryPolicy> {
    let mut overrides: HashMap<String, RetryPolicy> = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix(SERVICE_PREFIX) else { continue };
        let Some((service, field)) = rest.split_once("__") else { continue };
        let entry = overrides.entry(service.to_string()).or_insert_with(RetryPolicy::default);
        match field {
            "TIMEOUT_SECONDS" => {
                if let Ok(secs) = value.parse() {
                    entry.timeout = Duration::from_secs(secs);
                }
            }
            "MAX_RETRIES" => {
                if let Ok(n) = value.parse() {
                    entry.max_retries = n;
                }
            }
            "BACKOFF_MS" => {
                if let Ok(ms) = value.parse() {
                    entry.backoff_ms = ms;
                }
            }
            _ => {}
        }
    }
    overrides
}

fn service_discovery_urls() -> HashMap<String, String> {
    let mut urls = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix(SERVICE_DISCOVERY_PREFIX) else { continue };
        let Some(service) = rest.strip_suffix("__URL") else { continue };
        urls.insert(service.to_string(), value);
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default_on_missing_or_invalid() {
        assert_eq!(env_parse::<u32>("GATEWAY_CONFIG_TEST_NONEXISTENT_KEY", 7), 7);
    }

    #[test]
    fn env_string_falls_back_to_default() {
        assert_eq!(env_string("GATEWAY_CONFIG_TEST_NONEXISTENT_KEY", "fallback"), "fallback");
    }
}
