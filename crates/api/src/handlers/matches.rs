//! Handlers for the `/matches` resource.
//!
//! Each mutating handler follows the same shape: load the row, resolve the
//! caller's role, ask `kingz_core` whether the operation is allowed, then apply
//! it with a conditional update. When the update matches no row another
//! request won the race; the row is reloaded and the rule check re-run so the
//! caller gets the precise reason.

use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use kingz_core::agreement::{self, AgreementOutcome};
use kingz_core::error::CoreError;
use kingz_core::match_lifecycle::{
    self, CancelRecordingOutcome, MatchRole, MatchRuleViolation, MatchState, MatchStatus,
    StartOutcome, MATCH_POLL_INTERVAL_SECS, MAX_VIDEO_BYTES,
};
use kingz_core::rewards::RewardQuote;
use kingz_core::types::{DbId, Timestamp};
use kingz_db::models::analysis_job::AnalysisJob;
use kingz_db::models::matches::{
    AgreeRequest, CreateMatch, DisputeRequest, Match, MatchListQuery, RespondRequest,
};
use kingz_db::repositories::{MatchRepo, SportRepo, UserRepo, VenueRepo};
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Lifetime of the signed playback URL handed to participants.
const PLAYBACK_URL_TTL: Duration = Duration::from_secs(3600);

/// A match as seen by one of its participants.
#[derive(Debug, Serialize)]
pub struct MatchView {
    #[serde(flatten)]
    pub record: Match,
    pub status: MatchStatus,
    /// The caller's seat in the match.
    pub role: MatchRole,
    pub video_playback_url: Option<String>,
    /// How often clients should re-fetch the match while it is live.
    pub poll_interval_secs: u64,
}

impl MatchView {
    fn new(record: Match, role: MatchRole, video_playback_url: Option<String>) -> AppResult<Self> {
        Ok(Self {
            status: record.status()?,
            record,
            role,
            video_playback_url,
            poll_interval_secs: MATCH_POLL_INTERVAL_SECS,
        })
    }
}

/// Result summary personalised for the caller.
#[derive(Debug, Serialize)]
pub struct MatchResults {
    pub analyzing: bool,
    pub status: MatchStatus,
    pub player1_score: Option<i32>,
    pub player2_score: Option<i32>,
    pub winner_id: Option<DbId>,
    pub is_draw: bool,
    pub you_won: bool,
    pub xp_earned: Option<i32>,
    pub rp_earned: Option<i32>,
    pub rewards: Option<RewardQuote>,
    pub analysis_confidence: Option<f64>,
    pub player1_agreed: bool,
    pub player2_agreed: bool,
    pub both_agreed: bool,
}

/// POST /api/v1/matches
///
/// Challenge another player. The challenge stays answerable for two minutes.
pub async fn create_match(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateMatch>,
) -> AppResult<(StatusCode, Json<DataResponse<MatchView>>)> {
    match_lifecycle::validate_new_challenge(auth.user_id, input.opponent_id)?;

    UserRepo::find_by_id(&state.pool, input.opponent_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: input.opponent_id,
        }))?;
    VenueRepo::find_by_id(&state.pool, input.venue_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Venue",
            id: input.venue_id,
        }))?;
    SportRepo::find_by_id(&state.pool, input.sport_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Sport",
            id: input.sport_id,
        }))?;

    let expires_at = match_lifecycle::challenge_expires_at(Utc::now());
    let created = MatchRepo::create(&state.pool, auth.user_id, &input, expires_at).await?;

    tracing::info!(
        match_id = created.id,
        user_id = auth.user_id,
        opponent_id = input.opponent_id,
        venue_id = input.venue_id,
        "Challenge created"
    );

    let view = MatchView::new(created, MatchRole::Challenger, None)?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: view })))
}

/// GET /api/v1/matches
///
/// The caller's matches, newest first, optionally filtered by `?status=`.
pub async fn list_matches(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<MatchListQuery>,
) -> AppResult<Json<DataResponse<Vec<MatchView>>>> {
    let status = params
        .status
        .as_deref()
        .map(|name| {
            MatchStatus::from_name(name)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown match status: {name}")))
        })
        .transpose()?;

    let matches =
        MatchRepo::list_for_user(&state.pool, auth.user_id, status, params.limit, params.offset)
            .await?;

    let views = matches
        .into_iter()
        .map(|m| {
            let role = m.participants().require_role(auth.user_id)?;
            MatchView::new(m, role, None)
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(DataResponse { data: views }))
}

/// GET /api/v1/matches/{id}
///
/// Full snapshot for a participant, including a short-lived playback URL once
/// the video is stored. Returns 403 for anyone else.
pub async fn get_match(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<MatchView>>> {
    let current = load_match(&state, id).await?;
    let role = current.participants().require_role(auth.user_id)?;
    let playback = playback_url(&state, &current).await;
    Ok(Json(DataResponse {
        data: MatchView::new(current, role, playback)?,
    }))
}

/// POST /api/v1/matches/{id}/respond
///
/// The opponent accepts or declines; the challenger may withdraw with
/// `accept: false`. Responding after the two-minute window cancels the
/// challenge instead.
pub async fn respond(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<RespondRequest>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    let role = current.participants().require_role(auth.user_id)?;

    let to = match match_lifecycle::plan_response(
        &current.state()?,
        role,
        input.accept,
        Utc::now(),
    ) {
        Err(MatchRuleViolation::ChallengeExpired) => return Err(expire_challenge(&state, id).await),
        planned => planned?,
    };

    let updated = match MatchRepo::respond(&state.pool, id, to).await? {
        Some(m) => m,
        None => {
            // The clock in the database is authoritative for expiry.
            if MatchRepo::expire(&state.pool, id).await? {
                tracing::info!(match_id = id, "Challenge expired");
                return Err(MatchRuleViolation::ChallengeExpired.into());
            }
            let replanned = replan(&state, id, |s| {
                match_lifecycle::plan_response(s, role, input.accept, Utc::now())
            })
            .await?;
            return Err(lost_race(replanned));
        }
    };

    let status = updated.status()?;
    tracing::info!(match_id = id, user_id = auth.user_id, %status, "Challenge answered");

    Ok(Json(DataResponse {
        data: json!({ "success": true, "status": status }),
    }))
}

/// POST /api/v1/matches/{id}/start
///
/// Take the recording lock and move the match to `in_progress`. Calling it
/// again while holding the lock is a no-op.
pub async fn start_match(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    current.participants().require_role(auth.user_id)?;

    let recording = match match_lifecycle::plan_start(&current.state()?, auth.user_id)? {
        StartOutcome::AlreadyRecording => current,
        StartOutcome::Started => match MatchRepo::start_recording(&state.pool, id, auth.user_id)
            .await?
        {
            Some(m) => {
                tracing::info!(match_id = id, user_id = auth.user_id, "Recording started");
                m
            }
            None => {
                let latest = load_match(&state, id).await?;
                match match_lifecycle::plan_start(&latest.state()?, auth.user_id)? {
                    StartOutcome::AlreadyRecording => latest,
                    StartOutcome::Started => return Err(concurrent_change()),
                }
            }
        },
    };

    Ok(Json(DataResponse {
        data: json!({
            "success": true,
            "status": recording.status()?,
            "recording_by": recording.recording_by,
        }),
    }))
}

/// POST /api/v1/matches/{id}/cancel-recording
///
/// Release the recording lock so the other player can record instead.
pub async fn cancel_recording(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    current.participants().require_role(auth.user_id)?;

    let mut outcome = match_lifecycle::plan_cancel_recording(&current.state()?, auth.user_id)?;
    if outcome == CancelRecordingOutcome::Released
        && MatchRepo::cancel_recording(&state.pool, id, auth.user_id)
            .await?
            .is_none()
    {
        outcome = replan(&state, id, |s| {
            match_lifecycle::plan_cancel_recording(s, auth.user_id)
        })
        .await??;
        if outcome == CancelRecordingOutcome::Released {
            return Err(concurrent_change());
        }
    }

    let message = match outcome {
        CancelRecordingOutcome::Released => {
            tracing::info!(match_id = id, user_id = auth.user_id, "Recording cancelled");
            "Recording cancelled. Either player can start recording again."
        }
        CancelRecordingOutcome::NothingToRelease => "No recording in progress",
    };

    Ok(Json(DataResponse {
        data: json!({ "success": true, "message": message }),
    }))
}

/// POST /api/v1/matches/{id}/upload
///
/// Multipart upload of the match video (field `video`) by the recording
/// player. Exactly one upload per match succeeds; the video is stored, the
/// match moves to `analyzing` and an analysis job is queued in one
/// transaction.
pub async fn upload_video(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    mut multipart: Multipart,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    current.participants().require_role(auth.user_id)?;
    match_lifecycle::plan_upload(&current.state()?, auth.user_id).map_err(upload_rejection)?;

    let (content_type, data) = read_video_field(&mut multipart).await?;
    match_lifecycle::validate_video(content_type.as_deref(), data.len())?;
    let content_type = content_type.unwrap_or_default();

    let Some(reserved) = MatchRepo::begin_upload(&state.pool, id, auth.user_id).await? else {
        let replanned = replan(&state, id, |s| match_lifecycle::plan_upload(s, auth.user_id)).await?;
        return Err(match replanned {
            Err(violation) => upload_rejection(violation),
            Ok(()) => concurrent_change(),
        });
    };
    let reserved_at = reserved.upload_started_at.ok_or_else(|| {
        AppError::InternalError(format!("match {id} reserved for upload without a timestamp"))
    })?;

    let size_bytes = data.len();
    let key = match_lifecycle::video_path_hint(id, &content_type);
    let upload = UploadReservation {
        match_id: id,
        reserved_at,
        key,
        content_type,
    };
    let (updated, job, video_url) = tokio::spawn(settle_upload(state.clone(), upload, data))
        .await
        .map_err(|e| AppError::InternalError(format!("upload task failed: {e}")))??;

    tracing::info!(
        match_id = id,
        user_id = auth.user_id,
        job_id = job.id,
        size_bytes,
        %video_url,
        "Video uploaded, analysis queued"
    );

    Ok(Json(DataResponse {
        data: json!({
            "success": true,
            "status": updated.status()?,
            "video_url": video_url,
        }),
    }))
}

/// GET /api/v1/matches/{id}/results
///
/// `{ analyzing: true }` while the video is being processed, then the scores
/// and the caller's payout.
pub async fn get_results(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    let role = current.participants().require_role(auth.user_id)?;
    let status = current.status()?;

    let data = match status {
        MatchStatus::Uploading | MatchStatus::Analyzing => {
            json!({ "analyzing": true, "status": status })
        }
        MatchStatus::Completed | MatchStatus::Disputed => {
            serde_json::to_value(summarise(&current, role, status))
                .map_err(|e| AppError::InternalError(e.to_string()))?
        }
        status => {
            return Err(MatchRuleViolation::InvalidTransition {
                action: "view results",
                status,
            }
            .into())
        }
    };

    Ok(Json(DataResponse { data }))
}

/// POST /api/v1/matches/{id}/agree
///
/// Confirm (`agree: true`) or reject (`agree: false`) the analysed result.
/// Rejecting opens a dispute. Once both players confirm, their stats are
/// updated exactly once.
pub async fn agree(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<AgreeRequest>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let current = load_match(&state, id).await?;
    let role = current.participants().require_role(auth.user_id)?;

    match agreement::plan_agreement(&current.state()?, role, input.agree)? {
        AgreementOutcome::Disputed => {
            let disputed = open_dispute(&state, id, auth.user_id, None, None).await?;
            Ok(Json(DataResponse {
                data: json!({
                    "success": true,
                    "both_agreed": false,
                    "status": disputed.status()?,
                }),
            }))
        }
        AgreementOutcome::Recorded { .. } => {
            let updated = match MatchRepo::set_agreed(&state.pool, id, role).await? {
                Some(m) => m,
                None => {
                    let replanned =
                        replan(&state, id, |s| agreement::plan_agreement(s, role, true)).await?;
                    return Err(lost_race(replanned));
                }
            };

            let both_agreed = updated.player1_agreed && updated.player2_agreed;
            tracing::info!(match_id = id, user_id = auth.user_id, both_agreed, "Result confirmed");

            if both_agreed && MatchRepo::finalize_stats(&state.pool, id).await? {
                tracing::info!(match_id = id, winner_id = ?updated.winner_id, "Player stats finalised");
            }

            Ok(Json(DataResponse {
                data: json!({
                    "success": true,
                    "both_agreed": both_agreed,
                    "status": updated.status()?,
                }),
            }))
        }
    }
}

/// POST /api/v1/matches/{id}/dispute
///
/// Flag the result for review. Allowed while analysis runs or after it
/// completed; later analysis results no longer apply to a disputed match.
pub async fn dispute(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<DisputeRequest>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let (reason, details) =
        agreement::validate_dispute_text(input.reason.as_deref(), input.details.as_deref())?;

    let current = load_match(&state, id).await?;
    current.participants().require_role(auth.user_id)?;
    agreement::plan_dispute(&current.state()?)?;

    let disputed =
        open_dispute(&state, id, auth.user_id, reason.as_deref(), details.as_deref()).await?;

    Ok(Json(DataResponse {
        data: json!({
            "success": true,
            "message": "Dispute submitted. The match result will be reviewed.",
            "status": disputed.status()?,
        }),
    }))
}

// ── Private helpers ──────────────────────────────────────────────────────

async fn load_match(state: &AppState, id: DbId) -> AppResult<Match> {
    MatchRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound { entity: "Match", id }))
}

/// Reload a match after a guarded update matched no row and re-run the rule
/// check against the fresh snapshot.
async fn replan<T>(
    state: &AppState,
    id: DbId,
    plan: impl FnOnce(&MatchState) -> Result<T, MatchRuleViolation>,
) -> AppResult<Result<T, MatchRuleViolation>> {
    let latest = load_match(state, id).await?;
    Ok(plan(&latest.state()?))
}

fn lost_race<T>(replanned: Result<T, MatchRuleViolation>) -> AppError {
    match replanned {
        Err(violation) => violation.into(),
        Ok(_) => concurrent_change(),
    }
}

fn concurrent_change() -> AppError {
    AppError::Core(CoreError::Conflict(
        "The match changed while your request was processed, please retry".into(),
    ))
}

/// Upload refusals are client errors; only non-participants get 403.
fn upload_rejection(violation: MatchRuleViolation) -> AppError {
    match violation {
        MatchRuleViolation::NotParticipant => violation.into(),
        other => AppError::BadRequest(other.to_string()),
    }
}

async fn expire_challenge(state: &AppState, id: DbId) -> AppError {
    match MatchRepo::expire(&state.pool, id).await {
        Ok(true) => {
            tracing::info!(match_id = id, "Challenge expired");
            MatchRuleViolation::ChallengeExpired.into()
        }
        Ok(false) => MatchRuleViolation::ChallengeExpired.into(),
        Err(err) => err.into(),
    }
}

async fn open_dispute(
    state: &AppState,
    id: DbId,
    actor_id: DbId,
    reason: Option<&str>,
    details: Option<&str>,
) -> AppResult<Match> {
    match MatchRepo::dispute(&state.pool, id, actor_id, reason, details).await? {
        Some(m) => {
            tracing::info!(match_id = id, user_id = actor_id, ?reason, "Result disputed");
            Ok(m)
        }
        None => {
            let replanned = replan(state, id, agreement::plan_dispute).await?;
            Err(lost_race(replanned))
        }
    }
}

async fn playback_url(state: &AppState, record: &Match) -> Option<String> {
    let url_ref = record.video_url.as_deref()?;
    match state.blob_store.signed_url(url_ref, PLAYBACK_URL_TTL).await {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(match_id = record.id, error = %err, "Could not sign playback URL");
            None
        }
    }
}

/// A reserved upload slot and where its video goes.
struct UploadReservation {
    match_id: DbId,
    reserved_at: Timestamp,
    key: String,
    content_type: String,
}

/// Store the video and settle the reservation either way.
///
/// Spawned off the request so a dropped connection or a request timeout
/// cannot leave the match in `uploading`. A reservation that still leaks is
/// reclaimed by `background::upload_reclaim`.
async fn settle_upload(
    state: AppState,
    upload: UploadReservation,
    data: Bytes,
) -> AppResult<(Match, AnalysisJob, String)> {
    let id = upload.match_id;
    let video_url = match state
        .blob_store
        .store(data, &upload.key, &upload.content_type)
        .await
    {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(match_id = id, error = %err, "Video storage failed, releasing upload");
            release_upload(&state, &upload).await;
            return Err(err.into());
        }
    };

    match MatchRepo::finish_upload(&state.pool, id, upload.reserved_at, &video_url).await {
        Ok(Some((updated, job))) => {
            state.analysis_wakeup.notify_one();
            Ok((updated, job, video_url))
        }
        Ok(None) => {
            tracing::warn!(match_id = id, %video_url, "Upload finished after the reservation was released");
            Err(concurrent_change())
        }
        Err(err) => {
            tracing::error!(match_id = id, error = %err, "Recording the upload failed, releasing upload");
            release_upload(&state, &upload).await;
            Err(err.into())
        }
    }
}

async fn release_upload(state: &AppState, upload: &UploadReservation) {
    if let Err(err) = MatchRepo::abort_upload(&state.pool, upload.match_id, upload.reserved_at).await
    {
        tracing::error!(
            match_id = upload.match_id,
            error = %err,
            "Could not release upload reservation, leaving it to the reclaim sweep"
        );
    }
}

/// Read the `video` (or `file`) field, refusing bodies above the size cap
/// without buffering them.
async fn read_video_field(multipart: &mut Multipart) -> AppResult<(Option<String>, Bytes)> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if !matches!(field.name(), Some("video") | Some("file")) {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            if buf.len() + chunk.len() > MAX_VIDEO_BYTES {
                return Err(AppError::BadRequest(format!(
                    "Video too large. Maximum size is {} MB.",
                    MAX_VIDEO_BYTES / (1024 * 1024)
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        return Ok((content_type, buf.freeze()));
    }

    Err(AppError::BadRequest(
        "Missing required 'video' field".into(),
    ))
}

fn summarise(record: &Match, role: MatchRole, status: MatchStatus) -> MatchResults {
    let participants = record.participants();
    let rewards = record.rewards();
    let [player1, player2] = agreement::stat_deltas(&participants, record.winner_id, rewards);
    let mine = match role {
        MatchRole::Challenger => player1,
        MatchRole::Opponent => player2,
    };

    MatchResults {
        analyzing: false,
        status,
        player1_score: record.player1_score,
        player2_score: record.player2_score,
        winner_id: record.winner_id,
        is_draw: rewards.is_some() && record.winner_id.is_none(),
        you_won: record.winner_id == Some(participants.user_for(role)),
        xp_earned: rewards.map(|_| mine.xp),
        rp_earned: rewards.map(|_| mine.rank_points),
        rewards,
        analysis_confidence: record.analysis_confidence,
        player1_agreed: record.player1_agreed,
        player2_agreed: record.player2_agreed,
        both_agreed: record.player1_agreed && record.player2_agreed,
    }
}
