//! Realm auth configuration.
//!
//! Configuration is loaded from environment variables.

use crate::cache::RefreshPolicy;
use crate::realm::{Realm, RealmEndpoints};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default key set cache TTL in seconds (4 hours).
pub const DEFAULT_KEY_SET_CACHE_TTL_SECONDS: u64 = 14_400;

/// Upper bound for the key set cache TTL in seconds (7 days).
pub const MAX_KEY_SET_CACHE_TTL_SECONDS: u64 = 604_800;

/// Default timeout for identity provider requests in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound for the identity provider request timeout in seconds.
pub const MAX_HTTP_TIMEOUT_SECONDS: u64 = 60;

/// Realm auth configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity provider base URL, without `/realms/...`.
    pub idp_base_url: String,

    /// Realm tokens are issued by.
    pub realm: Realm,

    /// Client id of this service; the audience of authorization decisions.
    pub client_id: String,

    /// How long a fetched key set is served before it is refreshed.
    pub key_set_cache_ttl: Duration,

    /// Timeout applied to every identity provider request.
    pub http_timeout: Duration,

    /// Clock skew tolerance for the token's active window.
    pub jwt_clock_skew: Duration,

    /// Behavior once the key set TTL has elapsed.
    pub key_set_refresh_policy: RefreshPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid identity provider URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid key set cache TTL configuration: {0}")]
    InvalidCacheTtl(String),

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid key set refresh policy: {0}")]
    InvalidRefreshPolicy(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let idp_base_url = required(vars, "IDP_BASE_URL")?;
        if !idp_base_url.starts_with("http://") && !idp_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(format!(
                "IDP_BASE_URL must start with http:// or https://, got '{}'",
                idp_base_url
            )));
        }

        let realm = Realm::new(required(vars, "IDP_REALM")?);
        let client_id = required(vars, "IDP_CLIENT_ID")?;

        // Parse key set TTL with validation
        let key_set_cache_ttl_seconds =
            if let Some(value_str) = vars.get("KEY_SET_CACHE_TTL_SECONDS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidCacheTtl(format!(
                        "KEY_SET_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidCacheTtl(
                        "KEY_SET_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                    ));
                }

                if value > MAX_KEY_SET_CACHE_TTL_SECONDS {
                    return Err(ConfigError::InvalidCacheTtl(format!(
                        "KEY_SET_CACHE_TTL_SECONDS must not exceed {} seconds, got {}",
                        MAX_KEY_SET_CACHE_TTL_SECONDS, value
                    )));
                }

                value
            } else {
                DEFAULT_KEY_SET_CACHE_TTL_SECONDS
            };

        // Parse HTTP timeout with validation
        let http_timeout_seconds = if let Some(value_str) = vars.get("IDP_HTTP_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidHttpTimeout(format!(
                    "IDP_HTTP_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if !(1..=MAX_HTTP_TIMEOUT_SECONDS).contains(&value) {
                return Err(ConfigError::InvalidHttpTimeout(format!(
                    "IDP_HTTP_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                    MAX_HTTP_TIMEOUT_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_HTTP_TIMEOUT_SECONDS
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            let Ok(seconds) = u64::try_from(value) else {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
                    value
                )));
            };

            if seconds > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(seconds)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let key_set_refresh_policy = match vars.get("KEY_SET_REFRESH_POLICY").map(String::as_str) {
            None | Some("wait") => RefreshPolicy::WaitForRefresh,
            Some("stale-while-revalidate") => RefreshPolicy::StaleWhileRevalidate,
            Some(other) => {
                return Err(ConfigError::InvalidRefreshPolicy(format!(
                    "KEY_SET_REFRESH_POLICY must be 'wait' or 'stale-while-revalidate', got '{}'",
                    other
                )));
            }
        };

        Ok(Config {
            idp_base_url,
            realm,
            client_id,
            key_set_cache_ttl: Duration::from_secs(key_set_cache_ttl_seconds),
            http_timeout: Duration::from_secs(http_timeout_seconds),
            jwt_clock_skew,
            key_set_refresh_policy,
        })
    }

    /// Identity provider URLs of the configured realm.
    pub fn endpoints(&self) -> RealmEndpoints {
        RealmEndpoints::new(&self.idp_base_url, self.realm.clone())
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}
