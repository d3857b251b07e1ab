//! HTTP middleware for services protected by realm tokens.
//!
//! # Components
//!
//! - `auth` - Authentication middleware for protected routes

pub mod auth;

pub use auth::{require_auth, AuthState, BearerToken, PrincipalExt};
