//! Key set fetching for realm token verification.
//!
//! The identity provider publishes each realm's signing keys as a JWK Set at
//! `{base}/realms/{realm}/protocol/openid-connect/certs`. A [`KeySet`] is
//! fetched wholesale and replaced wholesale; it is cached per realm by the
//! single-flight cache, never here.
//!
//! # Security
//!
//! - Fetches carry an explicit request timeout
//! - Encryption keys (`"use": "enc"`) are dropped so they can never verify a signature
//! - HTTPS should be used in production (enforced by deployment config)

use crate::cache::{CacheError, SingleFlightCache};
use crate::errors::AuthError;
use crate::realm::{Realm, RealmEndpoints};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Per-realm key set cache.
pub type KeySetCache = SingleFlightCache<Realm, Arc<KeySet>, FetchError>;

/// JSON Web Key from the realm's key set endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Signature algorithm the key is meant for (e.g. "RS256").
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" or "enc").
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// X coordinate (EC) or public key (OKP), base64url encoded.
    #[serde(default)]
    pub x: Option<String>,

    /// Y coordinate (EC), base64url encoded.
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus, base64url encoded.
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent, base64url encoded.
    #[serde(default)]
    pub e: Option<String>,
}

/// JWK Set document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// Immutable signing keys of one realm, indexed by key ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: HashMap<String, Jwk>,
}

impl KeySet {
    /// Build a key set, keeping only keys usable for signature verification.
    pub fn from_keys(keys: Vec<Jwk>) -> Self {
        let keys = keys
            .into_iter()
            .filter(|key| key.key_use.as_deref() != Some("enc"))
            .map(|key| (key.kid.clone(), key))
            .collect();
        Self { keys }
    }

    /// Look up a key by ID.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeyNotFound` if no key carries `kid`.
    pub fn find(&self, kid: &str) -> Result<&Jwk, AuthError> {
        self.keys
            .get(kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Errors fetching a key set. Cloneable so one failed load can be delivered
/// to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Key set request failed: {0}")]
    Http(String),

    #[error("Key set endpoint returned status {0}")]
    Status(u16),

    #[error("Invalid key set payload: {0}")]
    Parse(String),
}

impl From<CacheError<FetchError>> for AuthError {
    fn from(err: CacheError<FetchError>) -> Self {
        AuthError::LoadFailure(err.to_string())
    }
}

/// Retrieves a realm's current key set. Implementations perform no retries.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self, realm: &Realm) -> Result<KeySet, FetchError>;
}

/// Fetches key sets from the identity provider over HTTP.
pub struct HttpKeySetFetcher {
    /// Identity provider base URL.
    base_url: String,

    /// HTTP client; carries the request timeout.
    http_client: reqwest::Client,
}

impl HttpKeySetFetcher {
    /// Create a fetcher.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Identity provider base URL (without `/realms/...`)
    /// * `http_client` - Client configured with a bounded timeout
    pub fn new(base_url: String, http_client: reqwest::Client) -> Self {
        Self {
            base_url,
            http_client,
        }
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    #[instrument(skip_all, fields(realm = %realm))]
    async fn fetch(&self, realm: &Realm) -> Result<KeySet, FetchError> {
        let url = RealmEndpoints::new(&self.base_url, realm.clone()).certs_url();
        tracing::debug!(target: "realm_auth.jwks", url = %url, "Fetching key set");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            tracing::error!(target: "realm_auth.jwks", error = %e, "Failed to fetch key set");
            FetchError::Http(e.to_string())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "realm_auth.jwks",
                status = %response.status(),
                "Key set endpoint returned error"
            );
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "realm_auth.jwks", error = %e, "Failed to parse key set response");
            FetchError::Parse(e.to_string())
        })?;

        let key_set = KeySet::from_keys(jwks.keys);

        tracing::info!(
            target: "realm_auth.jwks",
            key_count = key_set.len(),
            "Key set fetched"
        );

        Ok(key_set)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CERTS_PATH: &str = "/realms/edu/protocol/openid-connect/certs";

    fn rsa_jwk(kid: &str, key_use: &str) -> serde_json::Value {
        serde_json::json!({
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": key_use,
            "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1Wl",
            "e": "AQAB",
            "x5t": "ignored-by-deserialization"
        })
    }

    fn fetcher(server: &MockServer) -> HttpKeySetFetcher {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        HttpKeySetFetcher::new(server.uri(), client)
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "OKP",
            "kid": "kid-1",
            "crv": "Ed25519",
            "x": "dGVzdC1wdWJsaWMta2V5LWRhdGE",
            "alg": "EdDSA",
            "use": "sig"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.kid, "kid-1");
        assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
        assert_eq!(jwk.x.as_deref(), Some("dGVzdC1wdWJsaWMta2V5LWRhdGE"));
        assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert!(jwk.n.is_none());
    }

    #[test]
    fn test_jwk_deserialization_minimal() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty": "RSA", "kid": "kid-2"}"#).unwrap();

        assert_eq!(jwk.kid, "kid-2");
        assert!(jwk.alg.is_none());
        assert!(jwk.key_use.is_none());
        assert!(jwk.e.is_none());
    }

    #[test]
    fn test_key_set_find() {
        let jwks: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [rsa_jwk("kid-1", "sig")]
        }))
        .unwrap();
        let key_set = KeySet::from_keys(jwks.keys);

        assert_eq!(key_set.find("kid-1").unwrap().kid, "kid-1");
        assert_eq!(
            key_set.find("kid-2").unwrap_err(),
            AuthError::KeyNotFound("kid-2".to_string())
        );
    }

    #[test]
    fn test_key_set_drops_encryption_keys() {
        let jwks: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [rsa_jwk("sig-key", "sig"), rsa_jwk("enc-key", "enc")]
        }))
        .unwrap();
        let key_set = KeySet::from_keys(jwks.keys);

        assert_eq!(key_set.len(), 1);
        assert!(key_set.find("enc-key").is_err());
    }

    #[test]
    fn test_cache_error_maps_to_load_failure() {
        let err: AuthError = CacheError::Load(FetchError::Status(502)).into();
        assert!(matches!(err, AuthError::LoadFailure(msg) if msg.contains("502")));

        let err: AuthError = CacheError::<FetchError>::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, AuthError::LoadFailure(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [rsa_jwk("kid-1", "sig"), rsa_jwk("kid-3", "sig")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key_set = fetcher(&server).fetch(&Realm::new("edu")).await.unwrap();

        assert_eq!(key_set.len(), 2);
        assert!(key_set.find("kid-3").is_ok());
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&Realm::new("edu")).await;

        assert_eq!(result.unwrap_err(), FetchError::Status(503));
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&Realm::new("edu")).await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch(&Realm::new("edu")).await;

        assert!(matches!(result, Err(FetchError::Http(_))));
    }
}
