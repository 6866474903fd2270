//! Domain logic for the Beat the Kingz match and check-in services.
//!
//! Everything in this crate is pure: no database, no network. The `db`
//! and `api` crates feed rows in and act on the decisions made here.

pub mod agreement;
pub mod discovery;
pub mod error;
pub mod geo;
pub mod match_lifecycle;
pub mod presence;
pub mod rewards;
pub mod types;
