//! Repository for the `player_stats` table.

use kingz_core::agreement::StatDelta;
use kingz_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::player_stats::PlayerStats;

const COLUMNS: &str = "user_id, sport_id, total_xp, rank_points, matches_played, \
                       matches_won, created_at, updated_at";

pub struct PlayerStatsRepo;

impl PlayerStatsRepo {
    /// Add one finished match to a player's totals, creating the row on
    /// first play.
    pub async fn apply_delta(
        conn: &mut PgConnection,
        sport_id: DbId,
        delta: &StatDelta,
    ) -> Result<PlayerStats, sqlx::Error> {
        let query = format!(
            "INSERT INTO player_stats \
                 (user_id, sport_id, total_xp, rank_points, matches_played, matches_won) \
             VALUES ($1, $2, $3, $4, 1, $5) \
             ON CONFLICT (user_id, sport_id) DO UPDATE SET \
                 total_xp = player_stats.total_xp + EXCLUDED.total_xp, \
                 rank_points = player_stats.rank_points + EXCLUDED.rank_points, \
                 matches_played = player_stats.matches_played + 1, \
                 matches_won = player_stats.matches_won + EXCLUDED.matches_won \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PlayerStats>(&query)
            .bind(delta.user_id)
            .bind(sport_id)
            .bind(i64::from(delta.xp))
            .bind(i64::from(delta.rank_points))
            .bind(i32::from(delta.won))
            .fetch_one(conn)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        user_id: DbId,
        sport_id: DbId,
    ) -> Result<Option<PlayerStats>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM player_stats WHERE user_id = $1 AND sport_id = $2"
        );
        sqlx::query_as::<_, PlayerStats>(&query)
            .bind(user_id)
            .bind(sport_id)
            .fetch_optional(pool)
            .await
    }
}
