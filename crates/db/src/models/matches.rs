//! Match rows and the request DTOs for the match endpoints.

use kingz_core::error::CoreError;
use kingz_core::match_lifecycle::{MatchParticipants, MatchState, MatchStatus};
use kingz_core::rewards::RewardQuote;
use kingz_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `matches` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Match {
    pub id: DbId,
    pub venue_id: DbId,
    pub sport_id: DbId,
    pub player1_id: DbId,
    pub player2_id: DbId,
    pub player1_score: Option<i32>,
    pub player2_score: Option<i32>,
    pub status_id: StatusId,
    pub recording_by: Option<DbId>,
    pub video_url: Option<String>,
    pub winner_id: Option<DbId>,
    pub winner_xp: Option<i32>,
    pub winner_rp: Option<i32>,
    pub loser_xp: Option<i32>,
    pub analysis_confidence: Option<f64>,
    pub player1_agreed: bool,
    pub player2_agreed: bool,
    pub dispute_reason: Option<String>,
    pub dispute_details: Option<String>,
    pub disputed_by: Option<DbId>,
    pub disputed_at: Option<Timestamp>,
    pub stats_applied_at: Option<Timestamp>,
    /// Set while an upload reservation is outstanding.
    pub upload_started_at: Option<Timestamp>,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Match {
    /// Decode `status_id`; an unknown id means the lookup table and the
    /// enum have drifted apart.
    pub fn status(&self) -> Result<MatchStatus, CoreError> {
        MatchStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "match {} has unknown status_id {}",
                self.id, self.status_id
            ))
        })
    }

    pub fn participants(&self) -> MatchParticipants {
        MatchParticipants {
            player1_id: self.player1_id,
            player2_id: self.player2_id,
        }
    }

    /// Snapshot of the fields that guard state transitions.
    pub fn state(&self) -> Result<MatchState, CoreError> {
        Ok(MatchState {
            status: self.status()?,
            recording_by: self.recording_by,
            has_video: self.video_url.is_some(),
            expires_at: self.expires_at,
            player1_agreed: self.player1_agreed,
            player2_agreed: self.player2_agreed,
        })
    }

    /// Stored payout, present once analysis produced scores.
    pub fn rewards(&self) -> Option<RewardQuote> {
        match (self.winner_xp, self.winner_rp, self.loser_xp) {
            (Some(winner_xp), Some(winner_rp), Some(loser_xp)) => Some(RewardQuote {
                winner_xp,
                winner_rp,
                loser_xp,
            }),
            _ => None,
        }
    }
}

/// DTO for `POST /api/v1/matches`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMatch {
    pub opponent_id: DbId,
    pub venue_id: DbId,
    pub sport_id: DbId,
}

/// Body of `POST /api/v1/matches/{id}/respond`.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub accept: bool,
}

/// Body of `POST /api/v1/matches/{id}/agree`.
#[derive(Debug, Deserialize)]
pub struct AgreeRequest {
    pub agree: bool,
}

/// Body of `POST /api/v1/matches/{id}/dispute`.
#[derive(Debug, Default, Deserialize)]
pub struct DisputeRequest {
    pub reason: Option<String>,
    pub details: Option<String>,
}

/// Query parameters for `GET /api/v1/matches`.
#[derive(Debug, Deserialize)]
pub struct MatchListQuery {
    /// Filter by status name (e.g. `in_progress`).
    pub status: Option<String>,
    /// Maximum number of results. Defaults to 20, capped at 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
