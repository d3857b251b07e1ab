//! Principal resolution hook.
//!
//! The core only establishes that a token is valid. Turning verified claims
//! into the application's own user identity (a database row, a tenant
//! membership, ...) is the application's job, plugged in through
//! [`PrincipalResolver`].

use crate::auth::claims::AccessClaims;
use crate::errors::AuthError;
use async_trait::async_trait;

/// Produces the application's identity for a verified token.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    type Principal: Clone + Send + Sync + 'static;

    /// Resolve `claims` of an already verified token.
    ///
    /// Return `AuthError::InvalidPrincipal` when the token is valid but does
    /// not map to a known identity.
    async fn resolve(&self, claims: &AccessClaims) -> Result<Self::Principal, AuthError>;
}

/// Identity taken straight from the token, for callers without a user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPrincipal {
    pub subject: String,
    pub username: Option<String>,
    pub scopes: Vec<String>,
}

/// Resolver that builds a [`TokenPrincipal`] from the claims alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPrincipalResolver;

#[async_trait]
impl PrincipalResolver for TokenPrincipalResolver {
    type Principal = TokenPrincipal;

    async fn resolve(&self, claims: &AccessClaims) -> Result<TokenPrincipal, AuthError> {
        let subject = claims.subject();
        if subject.is_empty() {
            return Err(AuthError::InvalidPrincipal);
        }

        Ok(TokenPrincipal {
            subject: subject.to_string(),
            username: claims.preferred_username.clone(),
            scopes: claims.scope.split_whitespace().map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn claims(sub: Option<&str>) -> AccessClaims {
        serde_json::from_value(serde_json::json!({
            "iss": "https://idp/realms/edu",
            "sub": sub,
            "typ": "Bearer",
            "exp": 1_900_000_000,
            "preferred_username": "alice",
            "scope": "openid profile"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_token_principal_from_claims() {
        let principal = TokenPrincipalResolver
            .resolve(&claims(Some("user-1")))
            .await
            .unwrap();

        assert_eq!(principal.subject, "user-1");
        assert_eq!(principal.username.as_deref(), Some("alice"));
        assert_eq!(principal.scopes, vec!["openid", "profile"]);
    }

    #[tokio::test]
    async fn test_missing_subject_is_invalid_principal() {
        let result = TokenPrincipalResolver.resolve(&claims(None)).await;

        assert_eq!(result.unwrap_err(), AuthError::InvalidPrincipal);
    }
}
