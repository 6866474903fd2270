//! Session token primitives.
//!
//! - [`jwt`] -- session token keys and verification.

pub mod jwt;
