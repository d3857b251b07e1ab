//! Mock identity provider for integration tests.
//!
//! Wraps a wiremock server laid out like a realm on the identity provider:
//! the key set lives at `/realms/{realm}/protocol/openid-connect/certs` and
//! authorization decisions are answered at the realm's token endpoint.

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Running mock identity provider serving a single realm.
pub struct MockIdentityProvider {
    server: MockServer,
    realm: String,
}

impl MockIdentityProvider {
    /// Start a mock provider for `realm` on a random local port.
    pub async fn start(realm: &str) -> Self {
        Self {
            server: MockServer::start().await,
            realm: realm.to_string(),
        }
    }

    /// Provider base URL (without `/realms/...`).
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Issuer URL tokens from this realm must carry.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.server.uri(), self.realm)
    }

    pub fn certs_path(&self) -> String {
        format!("/realms/{}/protocol/openid-connect/certs", self.realm)
    }

    pub fn token_path(&self) -> String {
        format!("/realms/{}/protocol/openid-connect/token", self.realm)
    }

    /// Underlying server, for custom mocks and request inspection.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `keys` as the realm's key set.
    pub async fn mount_key_set(&self, keys: &[Value]) {
        self.key_set_mock(keys).mount(&self.server).await;
    }

    /// Serve `keys` and verify on drop that exactly `calls` fetches happened.
    pub async fn mount_key_set_expecting(&self, keys: &[Value], calls: u64) {
        self.key_set_mock(keys).expect(calls).mount(&self.server).await;
    }

    /// Make the key set endpoint answer with `status`.
    pub async fn mount_key_set_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer every authorization decision request with `granted`.
    pub async fn mount_decision(&self, granted: bool) {
        Mock::given(method("POST"))
            .and(path(self.token_path()))
            .and(body_string_contains("response_mode=decision"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": granted })))
            .mount(&self.server)
            .await;
    }

    /// Answer every authorization decision request with a bare `status`.
    pub async fn mount_decision_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(self.token_path()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Drop all mounted mocks and recorded requests.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of requests received on `request_path` so far.
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    fn key_set_mock(&self, keys: &[Value]) -> Mock {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
    }
}
