//! Repository for the `venue_presence` table.
//!
//! `UNIQUE(user_id)` holds the one-venue-per-user invariant; check-in runs
//! its sweep, eviction, and upsert in a single transaction.

use kingz_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::presence::{ActivePlayerRecord, ActiveVenueRecord, CheckIn, VenuePresence};

/// Column list for `venue_presence` queries.
const COLUMNS: &str = "id, user_id, venue_id, latitude, longitude, last_seen_at, created_at";

/// Provides presence tracking for venue check-ins.
pub struct PresenceRepo;

impl PresenceRepo {
    /// Check a user in at `venue_id`.
    ///
    /// Sweeps every record last seen before `stale_before`, removes the
    /// user's record at any other venue, and upserts the record for this
    /// venue with `last_seen_at = NOW()`.
    pub async fn check_in(
        pool: &PgPool,
        user_id: DbId,
        venue_id: DbId,
        latitude: f64,
        longitude: f64,
        stale_before: Timestamp,
    ) -> Result<CheckIn, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let stale_removed = sqlx::query("DELETE FROM venue_presence WHERE last_seen_at < $1")
            .bind(stale_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let moved = sqlx::query("DELETE FROM venue_presence WHERE user_id = $1 AND venue_id <> $2")
            .bind(user_id)
            .bind(venue_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let query = format!(
            "INSERT INTO venue_presence (user_id, venue_id, latitude, longitude, last_seen_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 venue_id = EXCLUDED.venue_id, \
                 latitude = EXCLUDED.latitude, \
                 longitude = EXCLUDED.longitude, \
                 last_seen_at = NOW() \
             RETURNING {COLUMNS}"
        );
        let presence = sqlx::query_as::<_, VenuePresence>(&query)
            .bind(user_id)
            .bind(venue_id)
            .bind(latitude)
            .bind(longitude)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CheckIn {
            presence,
            stale_removed,
            moved_from_other_venue: moved > 0,
        })
    }

    /// Delete the user's record at `venue_id`. Returns `false` if none existed.
    pub async fn check_out(pool: &PgPool, user_id: DbId, venue_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM venue_presence WHERE user_id = $1 AND venue_id = $2")
            .bind(user_id)
            .bind(venue_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The user's record at `venue_id`, if checked in there.
    pub async fn get_status(
        pool: &PgPool,
        user_id: DbId,
        venue_id: DbId,
    ) -> Result<Option<VenuePresence>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM venue_presence WHERE user_id = $1 AND venue_id = $2"
        );
        sqlx::query_as::<_, VenuePresence>(&query)
            .bind(user_id)
            .bind(venue_id)
            .fetch_optional(pool)
            .await
    }

    /// The user's record at whichever venue they are checked in at.
    pub async fn find_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<VenuePresence>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM venue_presence WHERE user_id = $1");
        sqlx::query_as::<_, VenuePresence>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Refresh position and `last_seen_at` of an existing record.
    ///
    /// Never creates a record; returns `None` when the user is not checked
    /// in at `venue_id`.
    pub async fn heartbeat(
        pool: &PgPool,
        user_id: DbId,
        venue_id: DbId,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<VenuePresence>, sqlx::Error> {
        let query = format!(
            "UPDATE venue_presence \
             SET latitude = $3, longitude = $4, last_seen_at = NOW() \
             WHERE user_id = $1 AND venue_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VenuePresence>(&query)
            .bind(user_id)
            .bind(venue_id)
            .bind(latitude)
            .bind(longitude)
            .fetch_optional(pool)
            .await
    }

    /// Delete every record last seen before `cutoff`. Returns the count removed.
    pub async fn sweep_stale(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM venue_presence WHERE last_seen_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Venues with at least one record seen at or after `fresh_since`.
    pub async fn active_venues(
        pool: &PgPool,
        fresh_since: Timestamp,
    ) -> Result<Vec<ActiveVenueRecord>, sqlx::Error> {
        sqlx::query_as::<_, ActiveVenueRecord>(
            "SELECT DISTINCT v.id AS venue_id, v.name, v.district, v.latitude, v.longitude \
             FROM venues v \
             JOIN venue_presence p ON p.venue_id = v.id \
             WHERE p.last_seen_at >= $1 \
             ORDER BY v.id",
        )
        .bind(fresh_since)
        .fetch_all(pool)
        .await
    }

    /// Players behind the fresh presence records, with their total XP.
    ///
    /// XP is taken from `sport_id` when given, otherwise summed over all
    /// sports; players without stats count as zero.
    pub async fn active_players(
        pool: &PgPool,
        fresh_since: Timestamp,
        sport_id: Option<DbId>,
    ) -> Result<Vec<ActivePlayerRecord>, sqlx::Error> {
        sqlx::query_as::<_, ActivePlayerRecord>(
            "SELECT p.venue_id, u.id AS user_id, u.username, u.avatar_url, \
                    COALESCE(( \
                        SELECT SUM(s.total_xp) FROM player_stats s \
                        WHERE s.user_id = u.id AND ($2::BIGINT IS NULL OR s.sport_id = $2) \
                    ), 0)::BIGINT AS total_xp, \
                    p.last_seen_at \
             FROM venue_presence p \
             JOIN users u ON u.id = p.user_id \
             WHERE p.last_seen_at >= $1 \
             ORDER BY p.venue_id, u.id",
        )
        .bind(fresh_since)
        .bind(sport_id)
        .fetch_all(pool)
        .await
    }
}
