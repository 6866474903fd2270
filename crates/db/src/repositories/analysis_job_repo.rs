//! Repository for the `analysis_jobs` queue.
//!
//! One row per match (`uq_analysis_jobs_match`). The dispatcher claims rows
//! with `FOR UPDATE SKIP LOCKED`, so several API instances can share the
//! queue without double-dispatch.

use kingz_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::analysis_job::AnalysisJob;
use crate::models::status::AnalysisJobStatus;

/// Column list for `analysis_jobs` queries.
const COLUMNS: &str = "\
    id, match_id, video_url, status_id, attempts, last_error, \
    next_attempt_at, claimed_at, completed_at, created_at, updated_at";

pub struct AnalysisJobRepo;

impl AnalysisJobRepo {
    /// Insert a pending job. Called inside the upload transaction.
    pub async fn enqueue(
        conn: &mut PgConnection,
        match_id: DbId,
        video_url: &str,
    ) -> Result<AnalysisJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO analysis_jobs (match_id, video_url, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJob>(&query)
            .bind(match_id)
            .bind(video_url)
            .bind(AnalysisJobStatus::Pending.id())
            .fetch_one(conn)
            .await
    }

    /// Atomically claim the next due pending job and count the attempt.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $1, claimed_at = NOW(), attempts = attempts + 1 \
             WHERE id = ( \
                 SELECT id FROM analysis_jobs \
                 WHERE status_id = $2 AND next_attempt_at <= NOW() \
                 ORDER BY next_attempt_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJob>(&query)
            .bind(AnalysisJobStatus::Running.id())
            .bind(AnalysisJobStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    pub async fn complete(pool: &PgPool, job_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE analysis_jobs SET status_id = $2, completed_at = NOW(), last_error = NULL \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(AnalysisJobStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Put a running job back in the queue, due after `delay_secs`.
    pub async fn schedule_retry(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
        delay_secs: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE analysis_jobs \
             SET status_id = $2, last_error = $3, claimed_at = NULL, \
                 next_attempt_at = NOW() + ($4::FLOAT8 * INTERVAL '1 second') \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(AnalysisJobStatus::Pending.id())
        .bind(error)
        .bind(delay_secs)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a job as permanently failed.
    pub async fn fail(pool: &PgPool, job_id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE analysis_jobs SET status_id = $2, last_error = $3, completed_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(AnalysisJobStatus::Failed.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return jobs left `running` for longer than `timeout_secs` to the queue.
    ///
    /// Covers a dispatcher that died between claim and completion.
    pub async fn release_stale_claims(pool: &PgPool, timeout_secs: f64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET status_id = $1, claimed_at = NULL \
             WHERE status_id = $2 \
               AND claimed_at < NOW() - ($3::FLOAT8 * INTERVAL '1 second')",
        )
        .bind(AnalysisJobStatus::Pending.id())
        .bind(AnalysisJobStatus::Running.id())
        .bind(timeout_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_match(
        pool: &PgPool,
        match_id: DbId,
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analysis_jobs WHERE match_id = $1");
        sqlx::query_as::<_, AnalysisJob>(&query)
            .bind(match_id)
            .fetch_optional(pool)
            .await
    }
}
