//! Token verification for realm access tokens.
//!
//! Verifies bearer tokens against the signing keys the realm publishes.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only asymmetric algorithms are accepted (RSA, RSA-PSS, ECDSA, EdDSA)
//! - The header algorithm must match the key's declared algorithm
//! - Issuer, subject, token type and active window are all required
//! - Every failure collapses to "not verified"; the reason is only logged

use crate::auth::claims::{AccessClaims, BEARER_TOKEN_TYPE};
use crate::auth::jwks::{Jwk, KeySet, KeySetCache, KeySetFetcher};
use crate::errors::AuthError;
use crate::realm::RealmEndpoints;
use common::jwt::{decode_unverified, JwtValidationError, TokenHeader};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::IgnoredAny;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Why a token was not accepted. Internal only; callers see `false`/`None`.
#[derive(Debug, Error)]
enum Rejection {
    #[error("malformed token: {0:?}")]
    Malformed(JwtValidationError),

    #[error("{0}")]
    KeySet(AuthError),

    #[error("claim check failed: {0}")]
    Claim(ClaimRejection),

    #[error("unacceptable algorithm: {0}")]
    Algorithm(String),

    #[error("signature check failed: {0}")]
    Signature(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
enum ClaimRejection {
    #[error("issuer does not match realm")]
    IssuerMismatch,

    #[error("subject missing or empty")]
    MissingSubject,

    #[error("token type is not Bearer")]
    WrongTokenType,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("token expired")]
    Expired,

    #[error("token issued in the future")]
    IssuedInFuture,
}

/// Verifies bearer tokens issued by one realm.
pub struct TokenVerifier {
    endpoints: RealmEndpoints,
    key_sets: Arc<KeySetCache>,
    fetcher: Arc<dyn KeySetFetcher>,
    clock_skew_seconds: i64,
}

impl TokenVerifier {
    /// Create a verifier.
    ///
    /// # Arguments
    ///
    /// * `endpoints` - Realm whose issuer tokens must carry
    /// * `key_sets` - Cache that memoizes the realm's key set
    /// * `fetcher` - Loader invoked by the cache on miss or expiry
    /// * `clock_skew` - Tolerance applied to both ends of the active window
    pub fn new(
        endpoints: RealmEndpoints,
        key_sets: Arc<KeySetCache>,
        fetcher: Arc<dyn KeySetFetcher>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            endpoints,
            key_sets,
            fetcher,
            clock_skew_seconds: i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn endpoints(&self) -> &RealmEndpoints {
        &self.endpoints
    }

    /// Whether `token` is a validly signed, currently active Bearer token of
    /// this realm. Never fails; any problem yields `false`.
    pub async fn verify(&self, token: &str) -> bool {
        self.authenticate(token).await.is_some()
    }

    /// Verify `token` and return its claims.
    ///
    /// Returns `None` for every kind of failure, including an unreachable
    /// identity provider.
    #[instrument(skip_all, fields(realm = %self.endpoints.realm()))]
    pub async fn authenticate(&self, token: &str) -> Option<AccessClaims> {
        let now = chrono::Utc::now().timestamp();
        match self.check(token, now).await {
            Ok(claims) => {
                tracing::debug!(target: "realm_auth.jwt", "Token verified");
                Some(claims)
            }
            Err(rejection) => {
                tracing::debug!(target: "realm_auth.jwt", reason = %rejection, "Token rejected");
                None
            }
        }
    }

    /// Run every check against `token` as of Unix time `now`.
    async fn check(&self, token: &str, now: i64) -> Result<AccessClaims, Rejection> {
        // 1. Parse header and claims (includes size check via common::jwt)
        let unverified =
            decode_unverified::<AccessClaims>(token).map_err(Rejection::Malformed)?;

        // 2. Resolve the signing key through the cache
        let key_set = self.key_set().await.map_err(Rejection::KeySet)?;
        let jwk = key_set
            .find(&unverified.header.kid)
            .map_err(Rejection::KeySet)?;

        // 3. Claims
        validate_claims(
            &unverified.claims,
            &self.endpoints.issuer(),
            now,
            self.clock_skew_seconds,
        )
        .map_err(Rejection::Claim)?;

        // 4. Signature
        verify_signature(token, &unverified.header, jwk)?;

        Ok(unverified.claims)
    }

    async fn key_set(&self) -> Result<Arc<KeySet>, AuthError> {
        let realm = self.endpoints.realm().clone();
        let fetcher = Arc::clone(&self.fetcher);
        let loader_realm = realm.clone();

        let key_set = self
            .key_sets
            .get_with(realm, move || async move {
                fetcher.fetch(&loader_realm).await.map(Arc::new)
            })
            .await?;
        Ok(key_set)
    }
}

/// Validate issuer, subject, type and the active window.
///
/// The window is `nbf - skew <= now < exp + skew`; a token without `nbf` has
/// no lower bound. `iat` may not lie further in the future than the skew.
fn validate_claims(
    claims: &AccessClaims,
    issuer: &str,
    now: i64,
    skew: i64,
) -> Result<(), ClaimRejection> {
    if claims.iss != issuer {
        return Err(ClaimRejection::IssuerMismatch);
    }

    if claims.sub.as_deref().map_or(true, str::is_empty) {
        return Err(ClaimRejection::MissingSubject);
    }

    if claims.typ.as_deref() != Some(BEARER_TOKEN_TYPE) {
        return Err(ClaimRejection::WrongTokenType);
    }

    if let Some(nbf) = claims.nbf {
        if now < nbf.saturating_sub(skew) {
            return Err(ClaimRejection::NotYetValid);
        }
    }

    if now >= claims.exp.saturating_add(skew) {
        return Err(ClaimRejection::Expired);
    }

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(ClaimRejection::IssuedInFuture);
        }
    }

    Ok(())
}

/// Algorithm the token may be verified with, given the header and the key.
fn signing_algorithm(header: &TokenHeader, jwk: &Jwk) -> Result<Algorithm, Rejection> {
    if let Some(key_alg) = &jwk.alg {
        if key_alg != &header.alg {
            return Err(Rejection::Algorithm(format!(
                "header {} does not match key {}",
                header.alg, key_alg
            )));
        }
    }

    let algorithm = Algorithm::from_str(&header.alg)
        .map_err(|_| Rejection::Algorithm(header.alg.clone()))?;

    let kty_matches = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => jwk.kty == "RSA",
        Algorithm::ES256 | Algorithm::ES384 => jwk.kty == "EC",
        Algorithm::EdDSA => jwk.kty == "OKP",
        // Symmetric algorithms would turn a public key into a shared secret
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => false,
    };

    if !kty_matches {
        return Err(Rejection::Algorithm(format!(
            "{} not usable with {} key",
            header.alg, jwk.kty
        )));
    }

    Ok(algorithm)
}

/// Build the verification key from the JWK's public key material.
fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, Rejection> {
    let missing = |member: &str| Rejection::Signature(format!("key {} lacks {member}", jwk.kid));

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or_else(|| missing("n"))?;
            let e = jwk.e.as_deref().ok_or_else(|| missing("e"))?;
            DecodingKey::from_rsa_components(n, e)
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
            let y = jwk.y.as_deref().ok_or_else(|| missing("y"))?;
            DecodingKey::from_ec_components(x, y)
        }
        "OKP" => {
            if jwk.crv.as_deref().is_some_and(|crv| crv != "Ed25519") {
                return Err(Rejection::Signature(format!(
                    "unsupported curve for key {}",
                    jwk.kid
                )));
            }
            let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
            DecodingKey::from_ed_components(x)
        }
        other => {
            return Err(Rejection::Signature(format!("unsupported key type {other}")));
        }
    };

    key.map_err(|e| {
        tracing::warn!(target: "realm_auth.jwt", kid = %jwk.kid, error = %e, "Invalid key material");
        Rejection::Signature(e.to_string())
    })
}

/// Verify the signature only; claims were validated already.
fn verify_signature(token: &str, header: &TokenHeader, jwk: &Jwk) -> Result<(), Rejection> {
    let algorithm = signing_algorithm(header, jwk)?;
    let decoding_key = decoding_key(jwk)?;

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    decode::<IgnoredAny>(token, &decoding_key, &validation)
        .map(|_| ())
        .map_err(|e| Rejection::Signature(e.to_string()))
}
