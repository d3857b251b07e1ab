//! # Realm Auth
//!
//! Token verification and authorization against an external identity
//! provider organised in realms.
//!
//! - Verifies bearer tokens against the realm's published signing keys,
//!   failing closed on every error
//! - Caches the realm key set with per-key single-flight loading
//! - Delegates permission decisions to the provider's decision endpoint
//!
//! # Architecture
//!
//! ```text
//! middleware/auth.rs -> service.rs -> auth/jwt.rs   -> cache.rs + auth/jwks.rs
//!                                  -> authz/gate.rs -> authz/decision.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Claims, key set fetching and token verification
//! - `authz` - Permissions and the authorization gate
//! - `cache` - Single-flight TTL cache
//! - `config` - Configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `middleware` - Axum authentication middleware
//! - `principal` - Principal resolution hook
//! - `realm` - Realm identity and endpoint URLs
//! - `service` - Facade wiring everything together

pub mod auth;
pub mod authz;
pub mod cache;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod principal;
pub mod realm;
pub mod service;

pub use errors::AuthError;
pub use service::RealmAuth;
