//! # Realm Auth Test Utilities
//!
//! Shared test utilities for the realm auth crates.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys for reproducible tests)
//! - Test data builders (`TestTokenBuilder`)
//! - A mock identity provider (`MockIdentityProvider`) serving key sets and
//!   authorization decisions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realm_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let idp = MockIdentityProvider::start("edu").await;
//!     let keypair = TestKeypair::new(1, "kid-1");
//!     idp.mount_key_set(&[keypair.jwk_json()]).await;
//!
//!     let token = keypair.sign(&TestTokenBuilder::new(&idp.issuer()).for_user("alice").build());
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use token_builders::*;
