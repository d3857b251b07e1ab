//! Realm auth facade.
//!
//! Wires configuration, the HTTP client, the key set cache, the verifier and
//! the authorization gate into the three operations request handling needs.

use crate::auth::claims::AccessClaims;
use crate::auth::jwks::{HttpKeySetFetcher, KeySetCache};
use crate::auth::jwt::TokenVerifier;
use crate::authz::decision::UmaDecisionClient;
use crate::authz::gate::AuthorizationGate;
use crate::authz::permission::PermissionSet;
use crate::config::{Config, ConfigError};
use crate::errors::AuthError;
use std::sync::Arc;

/// Token verification and authorization for one realm.
pub struct RealmAuth {
    verifier: TokenVerifier,
    gate: AuthorizationGate,
}

impl RealmAuth {
    pub fn new(verifier: TokenVerifier, gate: AuthorizationGate) -> Self {
        Self { verifier, gate }
    }

    /// Build the production wiring from `config`.
    ///
    /// One HTTP client (with the configured timeout) serves both key set
    /// fetches and decision requests. Key set loads are bounded by the same
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::HttpClient` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let endpoints = config.endpoints();

        let key_sets = KeySetCache::new(config.key_set_cache_ttl)
            .with_load_timeout(config.http_timeout)
            .with_policy(config.key_set_refresh_policy);
        let fetcher = HttpKeySetFetcher::new(config.idp_base_url.clone(), http_client.clone());

        let verifier = TokenVerifier::new(
            endpoints.clone(),
            Arc::new(key_sets),
            Arc::new(fetcher),
            config.jwt_clock_skew,
        );

        let decider = UmaDecisionClient::new(&endpoints, config.client_id.clone(), http_client);
        let gate = AuthorizationGate::new(Arc::new(decider));

        tracing::info!(
            target: "realm_auth.service",
            realm = %config.realm,
            issuer = %endpoints.issuer(),
            cache_ttl_seconds = config.key_set_cache_ttl.as_secs(),
            refresh_policy = ?config.key_set_refresh_policy,
            "Realm auth initialized"
        );

        Ok(Self::new(verifier, gate))
    }

    /// Whether `token` is a valid access token of the realm.
    pub async fn verify_token(&self, token: &str) -> bool {
        self.verifier.verify(token).await
    }

    /// Verified claims of `token`, or `None` if it is not valid.
    pub async fn authenticate(&self, token: &str) -> Option<AccessClaims> {
        self.verifier.authenticate(token).await
    }

    /// Whether `token` is granted `permissions`.
    pub async fn is_granted(&self, token: &str, permissions: &PermissionSet) -> bool {
        self.gate.is_granted(token, permissions).await
    }

    /// Fail with `AuthError::PermissionDenied` unless `token` is granted
    /// `permissions`.
    pub async fn require_granted(
        &self,
        token: &str,
        permissions: &PermissionSet,
    ) -> Result<(), AuthError> {
        self.gate.require_granted(token, permissions).await
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }
}
