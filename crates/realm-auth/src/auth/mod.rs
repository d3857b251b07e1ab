//! Token authentication.
//!
//! # Components
//!
//! - `claims` - Access token claims
//! - `jwks` - Realm key set fetching
//! - `jwt` - Token verification against the realm key set

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::AccessClaims;
pub use jwks::{FetchError, HttpKeySetFetcher, KeySet, KeySetCache, KeySetFetcher};
pub use jwt::TokenVerifier;
