//! Access token claims structure.
//!
//! Contains the claims read from realm access tokens. `sub` and `email` are
//! redacted in Debug output to prevent exposure in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token type carried by access tokens.
pub const BEARER_TOKEN_TYPE: &str = "Bearer";

/// Claims of a realm access token.
///
/// Only `iss` and `exp` are structurally required; everything else is
/// checked by claim validation so that a missing value becomes a rejection
/// rather than a parse error.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer; must equal the realm's canonical URL.
    pub iss: String,

    /// Subject (user id) - redacted in Debug output.
    #[serde(default)]
    pub sub: Option<String>,

    /// Token type; access tokens carry "Bearer".
    #[serde(default)]
    pub typ: Option<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Client the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Email address - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Space-separated OAuth scopes.
    #[serde(default)]
    pub scope: String,
}

impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("typ", &self.typ)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("azp", &self.azp)
            .field("preferred_username", &self.preferred_username)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl AccessClaims {
    /// Subject of a verified token. Verification guarantees it is non-empty.
    pub fn subject(&self) -> &str {
        self.sub.as_deref().unwrap_or_default()
    }

    /// Check if the token has a specific OAuth scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }
}
