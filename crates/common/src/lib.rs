//! Common utilities shared across the realm auth crates.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (size limits, unverified decoding, constants)
pub mod jwt;
