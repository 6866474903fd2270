//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or a connection borrowed from an open transaction) as
//! the first argument.

pub mod analysis_job_repo;
pub mod match_repo;
pub mod player_stats_repo;
pub mod presence_repo;
pub mod sport_repo;
pub mod user_repo;
pub mod venue_repo;

pub use analysis_job_repo::AnalysisJobRepo;
pub use match_repo::MatchRepo;
pub use player_stats_repo::PlayerStatsRepo;
pub use presence_repo::PresenceRepo;
pub use sport_repo::SportRepo;
pub use user_repo::UserRepo;
pub use venue_repo::VenueRepo;
