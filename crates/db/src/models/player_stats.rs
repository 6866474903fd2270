use kingz_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `player_stats` table: one player's totals in one sport.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PlayerStats {
    pub user_id: DbId,
    pub sport_id: DbId,
    pub total_xp: i64,
    pub rank_points: i64,
    pub matches_played: i32,
    pub matches_won: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
