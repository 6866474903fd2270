//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the `Deserialize` DTOs the API accepts for it.

pub mod analysis_job;
pub mod matches;
pub mod player_stats;
pub mod presence;
pub mod sport;
pub mod status;
pub mod user;
pub mod venue;
