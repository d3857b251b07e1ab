//! JWT utilities shared across the realm auth crates.
//!
//! This module provides the pieces of token handling that happen before any
//! key material is involved:
//! - Size limits for DoS prevention
//! - Clock skew constants for active-window validation
//! - Unverified decoding of the JOSE header and claims
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Decoding here never verifies a signature; callers MUST verify the token
//!   against a trusted key before acting on any decoded claim
//! - Error messages are generic to prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::decode_unverified;
//!
//! let unverified = decode_unverified::<MyClaims>(token)?;
//! let key = key_set.find(&unverified.header.kid)?;
//! // ... verify the signature with `key`, then trust `unverified.claims`
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any base64 decoding, JSON
/// parsing or cryptographic operation.
///
/// # Rationale
///
/// - Typical identity provider access tokens are 800-2000 bytes
/// - 8KB allows for large role/group claims while preventing abuse
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock skew tolerance applied to the token's active window.
///
/// Zero means the window is enforced exactly: `nbf <= now < exp`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Maximum allowed clock skew tolerance (10 minutes).
///
/// This prevents misconfiguration that could weaken security by allowing
/// excessively large clock skew tolerance.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while decoding a JWT without verification.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,
}

// =============================================================================
// Decoded Types
// =============================================================================

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    typ: Option<String>,
}

/// JOSE header fields relevant for key selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signature algorithm declared by the token (e.g. "RS256", "EdDSA").
    pub alg: String,

    /// Key ID used to select the signing key from the key set. Never empty.
    pub kid: String,

    /// Media type of the token, usually "JWT".
    pub typ: Option<String>,
}

/// A decoded but NOT verified token.
#[derive(Debug, Clone)]
pub struct UnverifiedToken<C> {
    /// Decoded JOSE header.
    pub header: TokenHeader,

    /// Decoded claims. Untrusted until the signature is verified.
    pub claims: C,
}

// =============================================================================
// Functions
// =============================================================================

/// Decode the header and claims of a compact JWT without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - This function does NOT validate the token signature
/// - The `kid` value should only be used for key lookup in a trusted key set
///
/// # Errors
///
/// Returns `JwtValidationError` variants:
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, or invalid JSON in either part
/// - `MissingKid` - Header has no `kid`, `kid` is not a string, or `kid` is empty
pub fn decode_unverified<C: DeserializeOwned>(
    token: &str,
) -> Result<UnverifiedToken<C>, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header: RawHeader = decode_part(header_part, "header")?;

    // Reject empty values for defense-in-depth
    let kid = header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or(JwtValidationError::MissingKid)?;

    let claims: C = decode_part(payload_part, "payload")?;

    Ok(UnverifiedToken {
        header: TokenHeader {
            alg: header.alg,
            kid,
            typ: header.typ,
        },
        claims,
    })
}

fn decode_part<T: DeserializeOwned>(part: &str, name: &str) -> Result<T, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|e| {
        tracing::debug!(target: "common.jwt", part = name, error = %e, "Failed to decode JWT base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", part = name, error = %e, "Failed to parse JWT JSON");
        JwtValidationError::MalformedToken
    })
}

// =============================================================================
// Tests
// =============================================================================
