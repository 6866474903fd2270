//! Repository for the `matches` table.
//!
//! Every transition is a single conditional `UPDATE ... WHERE status_id = <from>`
//! carrying the same guards the domain layer checks, returning the updated
//! row or `None` when a concurrent writer got there first.

use std::time::Duration;

use kingz_core::agreement::stat_deltas;
use kingz_core::match_lifecycle::{MatchOutcome, MatchRole, MatchStatus};
use kingz_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::analysis_job::AnalysisJob;
use crate::models::matches::{CreateMatch, Match};
use crate::repositories::{AnalysisJobRepo, PlayerStatsRepo};

/// Column list for `matches` queries.
const COLUMNS: &str = "\
    id, venue_id, sport_id, player1_id, player2_id, player1_score, player2_score, \
    status_id, recording_by, video_url, winner_id, winner_xp, winner_rp, loser_xp, \
    analysis_confidence, player1_agreed, player2_agreed, \
    dispute_reason, dispute_details, disputed_by, disputed_at, stats_applied_at, \
    upload_started_at, expires_at, created_at, started_at, completed_at, updated_at";

/// Maximum page size for match listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for match listing.
const DEFAULT_LIMIT: i64 = 20;

/// Provides the match lifecycle writes and reads.
pub struct MatchRepo;

impl MatchRepo {
    /// Insert a pending challenge from `challenger_id`.
    pub async fn create(
        pool: &PgPool,
        challenger_id: DbId,
        input: &CreateMatch,
        expires_at: Timestamp,
    ) -> Result<Match, sqlx::Error> {
        let query = format!(
            "INSERT INTO matches (venue_id, sport_id, player1_id, player2_id, status_id, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(input.venue_id)
            .bind(input.sport_id)
            .bind(challenger_id)
            .bind(input.opponent_id)
            .bind(MatchStatus::Pending.id())
            .bind(expires_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Match>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM matches WHERE id = $1");
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Matches the user plays in, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        status: Option<MatchStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Match>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM matches \
             WHERE (player1_id = $1 OR player2_id = $1) \
               AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(user_id)
            .bind(status.map(MatchStatus::id))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Move an unexpired pending challenge to `accepted` or `declined`.
    pub async fn respond(
        pool: &PgPool,
        id: DbId,
        to: MatchStatus,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET status_id = $2 \
             WHERE id = $1 AND status_id = $3 AND expires_at > NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(to.id())
            .bind(MatchStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Cancel one pending challenge whose expiry has passed.
    pub async fn expire(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status_id = $2 \
             WHERE id = $1 AND status_id = $3 AND expires_at <= NOW()",
        )
        .bind(id)
        .bind(MatchStatus::Cancelled.id())
        .bind(MatchStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel every pending challenge whose expiry has passed.
    pub async fn expire_pending(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status_id = $1 WHERE status_id = $2 AND expires_at <= NOW()",
        )
        .bind(MatchStatus::Cancelled.id())
        .bind(MatchStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Take the recording lock: `accepted -> in_progress` with
    /// `recording_by = actor`, only if nobody else holds it.
    pub async fn start_recording(
        pool: &PgPool,
        id: DbId,
        actor_id: DbId,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches \
             SET status_id = $3, recording_by = $2, started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 AND status_id = $4 \
               AND (recording_by IS NULL OR recording_by = $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(actor_id)
            .bind(MatchStatus::InProgress.id())
            .bind(MatchStatus::Accepted.id())
            .fetch_optional(pool)
            .await
    }

    /// Release the recording lock held by `actor_id`: `in_progress -> accepted`.
    pub async fn cancel_recording(
        pool: &PgPool,
        id: DbId,
        actor_id: DbId,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET status_id = $3, recording_by = NULL \
             WHERE id = $1 AND recording_by = $2 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(actor_id)
            .bind(MatchStatus::Accepted.id())
            .bind(MatchStatus::InProgress.id())
            .fetch_optional(pool)
            .await
    }

    /// Reserve the upload slot: `in_progress -> uploading`.
    ///
    /// Only one request can win this update, so only one blob gets stored.
    /// The returned row's `upload_started_at` identifies the reservation for
    /// [`finish_upload`](Self::finish_upload) and
    /// [`abort_upload`](Self::abort_upload).
    pub async fn begin_upload(
        pool: &PgPool,
        id: DbId,
        actor_id: DbId,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET status_id = $3, upload_started_at = NOW() \
             WHERE id = $1 AND status_id = $4 AND recording_by = $2 AND video_url IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(actor_id)
            .bind(MatchStatus::Uploading.id())
            .bind(MatchStatus::InProgress.id())
            .fetch_optional(pool)
            .await
    }

    /// Return the reservation made at `reserved_at` after the upload failed.
    ///
    /// Returns `false` when that reservation is no longer current.
    pub async fn abort_upload(
        pool: &PgPool,
        id: DbId,
        reserved_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status_id = $2, upload_started_at = NULL \
             WHERE id = $1 AND status_id = $3 AND video_url IS NULL AND upload_started_at = $4",
        )
        .bind(id)
        .bind(MatchStatus::InProgress.id())
        .bind(MatchStatus::Uploading.id())
        .bind(reserved_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release every upload reservation older than `max_age` back to
    /// `in_progress`, so the recorder can upload again after a request died
    /// mid-upload. Returns the number of matches released.
    pub async fn release_stale_uploads(
        pool: &PgPool,
        max_age: Duration,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status_id = $1, upload_started_at = NULL \
             WHERE status_id = $2 AND video_url IS NULL \
               AND COALESCE(upload_started_at, updated_at) <= NOW() - make_interval(secs => $3)",
        )
        .bind(MatchStatus::InProgress.id())
        .bind(MatchStatus::Uploading.id())
        .bind(max_age.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Stamp `video_url`, move to `analyzing`, and enqueue the analysis job
    /// in one transaction.
    ///
    /// Returns `None` when the reservation made at `reserved_at` was released
    /// or superseded in the meantime.
    pub async fn finish_upload(
        pool: &PgPool,
        id: DbId,
        reserved_at: Timestamp,
        video_url: &str,
    ) -> Result<Option<(Match, AnalysisJob)>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE matches SET video_url = $2, status_id = $3, upload_started_at = NULL \
             WHERE id = $1 AND status_id = $4 AND video_url IS NULL AND upload_started_at = $5 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(video_url)
            .bind(MatchStatus::Analyzing.id())
            .bind(MatchStatus::Uploading.id())
            .bind(reserved_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job = AnalysisJobRepo::enqueue(&mut *tx, id, video_url).await?;
        tx.commit().await?;
        Ok(Some((updated, job)))
    }

    /// Store analysed scores and payout: `analyzing -> completed`.
    pub async fn record_outcome(
        pool: &PgPool,
        id: DbId,
        outcome: &MatchOutcome,
        confidence: Option<f64>,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET \
                 status_id = $2, player1_score = $3, player2_score = $4, winner_id = $5, \
                 winner_xp = $6, winner_rp = $7, loser_xp = $8, analysis_confidence = $9, \
                 completed_at = NOW() \
             WHERE id = $1 AND status_id = $10 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(MatchStatus::Completed.id())
            .bind(outcome.player1_score)
            .bind(outcome.player2_score)
            .bind(outcome.winner_id)
            .bind(outcome.rewards.winner_xp)
            .bind(outcome.rewards.winner_rp)
            .bind(outcome.rewards.loser_xp)
            .bind(confidence)
            .bind(MatchStatus::Analyzing.id())
            .fetch_optional(pool)
            .await
    }

    /// Complete a match whose analysis produced nothing usable.
    pub async fn complete_scoreless(pool: &PgPool, id: DbId) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET status_id = $2, completed_at = NOW() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(MatchStatus::Completed.id())
            .bind(MatchStatus::Analyzing.id())
            .fetch_optional(pool)
            .await
    }

    /// Set the agreement flag for `role` on a completed match.
    pub async fn set_agreed(
        pool: &PgPool,
        id: DbId,
        role: MatchRole,
    ) -> Result<Option<Match>, sqlx::Error> {
        let column = match role {
            MatchRole::Challenger => "player1_agreed",
            MatchRole::Opponent => "player2_agreed",
        };
        let query = format!(
            "UPDATE matches SET {column} = TRUE \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(MatchStatus::Completed.id())
            .fetch_optional(pool)
            .await
    }

    /// Move an analysing or completed match to `disputed`.
    pub async fn dispute(
        pool: &PgPool,
        id: DbId,
        actor_id: DbId,
        reason: Option<&str>,
        details: Option<&str>,
    ) -> Result<Option<Match>, sqlx::Error> {
        let query = format!(
            "UPDATE matches SET \
                 status_id = $2, dispute_reason = $3, dispute_details = $4, \
                 disputed_by = $5, disputed_at = NOW() \
             WHERE id = $1 AND status_id IN ($6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(MatchStatus::Disputed.id())
            .bind(reason)
            .bind(details)
            .bind(actor_id)
            .bind(MatchStatus::Analyzing.id())
            .bind(MatchStatus::Completed.id())
            .fetch_optional(pool)
            .await
    }

    /// Apply the result to both players' stats once both have agreed.
    ///
    /// `stats_applied_at` is claimed and the stats written in the same
    /// transaction, so concurrent agreements apply the result exactly once.
    /// Returns `false` when there was nothing (left) to apply.
    pub async fn finalize_stats(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE matches SET stats_applied_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
               AND player1_agreed AND player2_agreed AND stats_applied_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, Match>(&query)
            .bind(id)
            .bind(MatchStatus::Completed.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(m) = claimed else {
            tx.rollback().await?;
            return Ok(false);
        };

        for delta in stat_deltas(&m.participants(), m.winner_id, m.rewards()) {
            PlayerStatsRepo::apply_delta(&mut *tx, m.sport_id, &delta).await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
