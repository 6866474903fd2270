//! Queue entries for match video analysis.

use kingz_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `analysis_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AnalysisJob {
    pub id: DbId,
    pub match_id: DbId,
    pub video_url: String,
    pub status_id: StatusId,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
