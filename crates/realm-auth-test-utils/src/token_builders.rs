//! Builder patterns for test data construction
//!
//! Provides a fluent API for creating realm access token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for creating test access token claims
///
/// Defaults describe a currently valid Bearer token for `test-subject`,
/// issued now and expiring in one hour.
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new("https://idp/realms/edu")
///     .for_user("alice")
///     .expires_in(300)
///     .build();
/// ```
pub struct TestTokenBuilder {
    iss: String,
    sub: Option<String>,
    typ: Option<String>,
    exp: i64,
    iat: i64,
    nbf: Option<i64>,
    azp: String,
    scope: String,
}

impl TestTokenBuilder {
    /// Create a new token builder issued by `issuer`
    pub fn new(issuer: &str) -> Self {
        let now = Utc::now();
        Self {
            iss: issuer.to_string(),
            sub: Some("test-subject".to_string()),
            typ: Some("Bearer".to_string()),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            nbf: None,
            azp: "grants-frontend".to_string(),
            scope: "openid profile".to_string(),
        }
    }

    /// Set the subject (user id)
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    /// Remove the subject claim
    pub fn without_subject(mut self) -> Self {
        self.sub = None;
        self
    }

    /// Set the token type claim (`typ`)
    pub fn with_type(mut self, typ: &str) -> Self {
        self.typ = Some(typ.to_string());
        self
    }

    /// Remove the token type claim
    pub fn without_type(mut self) -> Self {
        self.typ = None;
        self
    }

    /// Override the issuer
    pub fn issued_by(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    /// Set the scope (space-separated)
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set not-before in seconds from now (positive for not yet valid)
    pub fn not_before_in(mut self, seconds: i64) -> Self {
        self.nbf = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(self.iat));
        claims.insert("azp".to_string(), json!(self.azp));
        claims.insert("scope".to_string(), json!(self.scope));
        if let Some(sub) = self.sub {
            claims.insert("sub".to_string(), json!(sub));
        }
        if let Some(typ) = self.typ {
            claims.insert("typ".to_string(), json!(typ));
        }
        if let Some(nbf) = self.nbf {
            claims.insert("nbf".to_string(), json!(nbf));
        }
        Value::Object(claims)
    }
}
