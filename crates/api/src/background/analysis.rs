//! Match video analysis dispatcher.
//!
//! Uploads enqueue one `analysis_jobs` row per match. The dispatcher claims
//! due rows with [`AnalysisJobRepo::claim_next`] (`FOR UPDATE SKIP LOCKED`),
//! sends a signed video URL to the scoring oracle and records the outcome.
//! Failed calls are retried with linear back-off; once the attempts are used
//! up the match is completed without scores so it never stays in `analyzing`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kingz_cloud::scoring::{ScoreReport, ScoringError, ScoringOracle};
use kingz_cloud::storage::{BlobStore, StorageError};
use kingz_core::match_lifecycle::{decide_outcome, MatchStatus};
use kingz_core::types::DbId;
use kingz_db::models::analysis_job::AnalysisJob;
use kingz_db::models::matches::Match;
use kingz_db::repositories::{AnalysisJobRepo, MatchRepo};
use kingz_db::DbPool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisConfig;

/// Delay before retry `n` is `n * RETRY_BACKOFF_SECS`.
const RETRY_BACKOFF_SECS: f64 = 30.0;

/// Running jobs claimed longer ago than this are assumed abandoned.
const CLAIM_TIMEOUT_SECS: f64 = 600.0;

/// Lifetime of the URL the oracle downloads the video from.
const ORACLE_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
enum AnalysisFailure {
    #[error("video storage: {0}")]
    Storage(#[from] StorageError),

    #[error("scoring oracle: {0}")]
    Oracle(#[from] ScoringError),
}

/// Background service that drives queued analysis jobs to completion.
pub struct AnalysisDispatcher {
    pool: DbPool,
    store: Arc<dyn BlobStore>,
    oracle: Arc<dyn ScoringOracle>,
    wakeup: Arc<Notify>,
    poll_interval: Duration,
    max_attempts: i32,
}

impl AnalysisDispatcher {
    pub fn new(
        pool: DbPool,
        store: Arc<dyn BlobStore>,
        oracle: Arc<dyn ScoringOracle>,
        wakeup: Arc<Notify>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            pool,
            store,
            oracle,
            wakeup,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// Wakes on every poll tick and whenever an upload signals the shared
    /// [`Notify`], then drains all due jobs.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            max_attempts = self.max_attempts,
            "Analysis dispatcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Analysis dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.wakeup.notified() => {}
            }

            match AnalysisJobRepo::release_stale_claims(&self.pool, CLAIM_TIMEOUT_SECS).await {
                Ok(0) => {}
                Ok(released) => tracing::warn!(released, "Released abandoned analysis jobs"),
                Err(e) => tracing::error!(error = %e, "Failed to release stale analysis claims"),
            }

            while !cancel.is_cancelled() {
                match self.run_once().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Analysis dispatch cycle failed");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and process a single due job. Returns `false` when the queue
    /// had nothing due.
    pub async fn run_once(&self) -> Result<bool, sqlx::Error> {
        let Some(job) = AnalysisJobRepo::claim_next(&self.pool).await? else {
            return Ok(false);
        };
        tracing::info!(
            job_id = job.id,
            match_id = job.match_id,
            attempt = job.attempts,
            "Analysis job claimed"
        );

        let Some(record) = MatchRepo::find_by_id(&self.pool, job.match_id).await? else {
            tracing::warn!(job_id = job.id, match_id = job.match_id, "Match vanished, dropping job");
            AnalysisJobRepo::complete(&self.pool, job.id).await?;
            return Ok(true);
        };
        if record.status_id != MatchStatus::Analyzing.id() {
            tracing::info!(
                job_id = job.id,
                match_id = job.match_id,
                status_id = record.status_id,
                "Match no longer awaiting analysis, dropping job"
            );
            AnalysisJobRepo::complete(&self.pool, job.id).await?;
            return Ok(true);
        }

        match self.score(&job).await {
            Ok(Some(report)) => self.apply_report(&job, &record, &report).await?,
            Ok(None) => {
                tracing::warn!(match_id = job.match_id, "Oracle returned no scores");
                self.finish_scoreless(&job).await?;
                AnalysisJobRepo::complete(&self.pool, job.id).await?;
            }
            Err(failure) => self.handle_failure(&job, &failure).await?,
        }
        Ok(true)
    }

    async fn score(&self, job: &AnalysisJob) -> Result<Option<ScoreReport>, AnalysisFailure> {
        let url = self.store.signed_url(&job.video_url, ORACLE_URL_TTL).await?;
        let response = self.oracle.analyze(&url).await?;
        self.save_audit(job.match_id, &response.raw).await;
        Ok(response.report)
    }

    /// Keep the raw oracle answer for debugging. Never fails the job.
    async fn save_audit(&self, match_id: DbId, raw: &serde_json::Value) {
        let body = match serde_json::to_vec_pretty(raw) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                tracing::warn!(match_id, error = %e, "Could not serialise analysis audit");
                return;
            }
        };
        let key = format!("analysis/match_{match_id}.json");
        if let Err(e) = self.store.store(body, &key, "application/json").await {
            tracing::warn!(match_id, error = %e, "Could not store analysis audit");
        }
    }

    async fn apply_report(
        &self,
        job: &AnalysisJob,
        record: &Match,
        report: &ScoreReport,
    ) -> Result<(), sqlx::Error> {
        match decide_outcome(
            &record.participants(),
            report.player1_score,
            report.player2_score,
        ) {
            Ok(outcome) => {
                match MatchRepo::record_outcome(&self.pool, record.id, &outcome, report.confidence)
                    .await?
                {
                    Some(_) => tracing::info!(
                        match_id = record.id,
                        player1_score = outcome.player1_score,
                        player2_score = outcome.player2_score,
                        winner_id = ?outcome.winner_id,
                        winner_xp = outcome.rewards.winner_xp,
                        "Match analysed"
                    ),
                    None => tracing::info!(
                        match_id = record.id,
                        "Match left analyzing before its result arrived"
                    ),
                }
            }
            Err(violation) => {
                tracing::warn!(match_id = record.id, %violation, "Oracle returned unusable scores");
                self.finish_scoreless(job).await?;
            }
        }
        AnalysisJobRepo::complete(&self.pool, job.id).await
    }

    async fn handle_failure(
        &self,
        job: &AnalysisJob,
        failure: &AnalysisFailure,
    ) -> Result<(), sqlx::Error> {
        let error = failure.to_string();
        if job.attempts < self.max_attempts {
            let delay_secs = RETRY_BACKOFF_SECS * f64::from(job.attempts);
            tracing::warn!(
                job_id = job.id,
                match_id = job.match_id,
                attempt = job.attempts,
                delay_secs,
                %error,
                "Analysis failed, retrying"
            );
            AnalysisJobRepo::schedule_retry(&self.pool, job.id, &error, delay_secs).await
        } else {
            tracing::error!(
                job_id = job.id,
                match_id = job.match_id,
                attempts = job.attempts,
                %error,
                "Analysis failed permanently, completing match without scores"
            );
            self.finish_scoreless(job).await?;
            AnalysisJobRepo::fail(&self.pool, job.id, &error).await
        }
    }

    async fn finish_scoreless(&self, job: &AnalysisJob) -> Result<(), sqlx::Error> {
        if MatchRepo::complete_scoreless(&self.pool, job.match_id)
            .await?
            .is_some()
        {
            tracing::info!(match_id = job.match_id, "Match completed without scores");
        }
        Ok(())
    }
}
