//! Realm identity and the identity provider endpoints derived from it.

use std::fmt;

/// Tenant namespace within the identity provider.
///
/// Configured once at startup and used as the key set cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Realm(String);

impl Realm {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// URLs of one realm on the identity provider.
///
/// All URLs follow the `{base}/realms/{realm}` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmEndpoints {
    base_url: String,
    realm: Realm,
}

impl RealmEndpoints {
    /// Build endpoints from the provider base URL (trailing slashes are ignored).
    pub fn new(base_url: &str, realm: Realm) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            realm,
        }
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Canonical issuer URL; tokens must carry exactly this `iss`.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.base_url, self.realm)
    }

    /// Published signing key set (JWK Set).
    pub fn certs_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer())
    }

    /// Token endpoint, also used for authorization decisions.
    pub fn token_url(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.issuer())
    }
}
