//! 1v1 match state machine.
//!
//! ```text
//! pending ──accept──> accepted ──start──> in_progress ──upload──> uploading ──> analyzing ──> completed
//!    │                    ^                   │                       │                          │
//!    ├──decline──> declined                   └──cancel recording─────┘ (store failed)           └──> disputed
//!    └──expire───> cancelled
//! ```
//!
//! Every mutating operation has a `plan_*` function here that inspects a
//! [`MatchState`] snapshot and either names the destination status or returns
//! a [`MatchRuleViolation`] explaining why the caller may not act. The
//! repository applies the destination with a conditional update guarded by
//! the same preconditions, so a concurrent writer turns into a lost race
//! rather than a double transition.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::rewards::{calculate_rewards, RewardQuote, LOSER_XP};
use crate::types::{DbId, Timestamp};

/// A pending challenge expires this many seconds after creation.
pub const CHALLENGE_EXPIRY_SECS: i64 = 120;

/// Largest accepted match video (100 MiB).
pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;

/// Uploaded videos must carry a MIME type with this prefix.
pub const VIDEO_CONTENT_TYPE_PREFIX: &str = "video/";

/// Interval at which clients poll a match for state changes.
pub const MATCH_POLL_INTERVAL_SECS: u64 = 3;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Match status. Discriminants match the `match_statuses` seed data.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending = 1,
    Accepted = 2,
    Declined = 3,
    InProgress = 4,
    Uploading = 5,
    Analyzing = 6,
    Completed = 7,
    Disputed = 8,
    Cancelled = 9,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 9] = [
        MatchStatus::Pending,
        MatchStatus::Accepted,
        MatchStatus::Declined,
        MatchStatus::InProgress,
        MatchStatus::Uploading,
        MatchStatus::Analyzing,
        MatchStatus::Completed,
        MatchStatus::Disputed,
        MatchStatus::Cancelled,
    ];

    /// Return the database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Parse a database status ID.
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Parse the wire name (e.g. `"in_progress"`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::InProgress => "in_progress",
            Self::Uploading => "uploading",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Disputed => "disputed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses with no outgoing edges. `completed` is not one of them since
    /// a participant may still dispute it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled | Self::Disputed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Declined)
                | (Pending, Cancelled)
                | (Accepted, InProgress)
                | (InProgress, Uploading)
                | (InProgress, Accepted)
                | (Uploading, Analyzing)
                | (Uploading, InProgress)
                | (Analyzing, Completed)
                | (Analyzing, Disputed)
                | (Completed, Disputed)
        )
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The actor's seat in a match, derived by comparing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRole {
    /// `player1`, who issued the challenge.
    Challenger,
    /// `player2`, who was invited.
    Opponent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParticipants {
    pub player1_id: DbId,
    pub player2_id: DbId,
}

impl MatchParticipants {
    pub fn role_of(&self, actor_id: DbId) -> Option<MatchRole> {
        if actor_id == self.player1_id {
            Some(MatchRole::Challenger)
        } else if actor_id == self.player2_id {
            Some(MatchRole::Opponent)
        } else {
            None
        }
    }

    /// Resolve the actor's role or reject non-participants.
    pub fn require_role(&self, actor_id: DbId) -> Result<MatchRole, MatchRuleViolation> {
        self.role_of(actor_id)
            .ok_or(MatchRuleViolation::NotParticipant)
    }

    pub fn user_for(&self, role: MatchRole) -> DbId {
        match role {
            MatchRole::Challenger => self.player1_id,
            MatchRole::Opponent => self.player2_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot + violations
// ---------------------------------------------------------------------------

/// The fields of a match row that guard transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub status: MatchStatus,
    pub recording_by: Option<DbId>,
    pub has_video: bool,
    pub expires_at: Timestamp,
    pub player1_agreed: bool,
    pub player2_agreed: bool,
}

impl MatchState {
    /// A pending challenge past its expiry.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == MatchStatus::Pending && now >= self.expires_at
    }
}

/// Why an actor may not perform an operation on a match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchRuleViolation {
    #[error("You cannot challenge yourself")]
    SelfChallenge,

    #[error("You are not a participant in this match")]
    NotParticipant,

    #[error("Only the invited player can accept this challenge")]
    NotInvitedPlayer,

    #[error("Challenge is no longer pending (current status: {0})")]
    NotPending(MatchStatus),

    #[error("Challenge has expired")]
    ChallengeExpired,

    #[error("Cannot {action} while the match is {status}")]
    InvalidTransition {
        action: &'static str,
        status: MatchStatus,
    },

    #[error("The other player is already recording this match")]
    RecordingHeldByOpponent,

    #[error("Only the recording player can {action}")]
    NotRecordingHolder { action: &'static str },

    #[error("Video already uploaded. Analysis in progress or completed.")]
    AlreadyUploaded,

    #[error("Video upload already in progress")]
    UploadInProgress,

    #[error("Match result is already under dispute")]
    AlreadyDisputed,

    #[error("Scores must be non-negative, got {0} and {1}")]
    InvalidScores(i32, i32),
}

impl From<MatchRuleViolation> for CoreError {
    fn from(violation: MatchRuleViolation) -> Self {
        let msg = violation.to_string();
        match violation {
            MatchRuleViolation::SelfChallenge | MatchRuleViolation::InvalidScores(..) => {
                CoreError::Validation(msg)
            }
            MatchRuleViolation::NotParticipant
            | MatchRuleViolation::NotInvitedPlayer
            | MatchRuleViolation::NotRecordingHolder { .. } => CoreError::Forbidden(msg),
            _ => CoreError::Conflict(msg),
        }
    }
}

/// Check that the proposed destination is an edge of the state machine.
fn transition(
    from: MatchStatus,
    to: MatchStatus,
    action: &'static str,
) -> Result<MatchStatus, MatchRuleViolation> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(MatchRuleViolation::InvalidTransition {
            action,
            status: from,
        })
    }
}

// ---------------------------------------------------------------------------
// Challenge creation and response
// ---------------------------------------------------------------------------

pub fn validate_new_challenge(
    challenger_id: DbId,
    opponent_id: DbId,
) -> Result<(), MatchRuleViolation> {
    if challenger_id == opponent_id {
        return Err(MatchRuleViolation::SelfChallenge);
    }
    Ok(())
}

/// When a challenge created at `created_at` stops being answerable.
pub fn challenge_expires_at(created_at: Timestamp) -> Timestamp {
    created_at + chrono::Duration::seconds(CHALLENGE_EXPIRY_SECS)
}

/// Decide the outcome of a response to a pending challenge.
///
/// The opponent may accept or decline; the challenger may only withdraw
/// (`accept == false`), which also lands in `declined`.
pub fn plan_response(
    state: &MatchState,
    role: MatchRole,
    accept: bool,
    now: Timestamp,
) -> Result<MatchStatus, MatchRuleViolation> {
    if state.status != MatchStatus::Pending {
        return Err(MatchRuleViolation::NotPending(state.status));
    }
    if role == MatchRole::Challenger && accept {
        return Err(MatchRuleViolation::NotInvitedPlayer);
    }
    if state.is_expired(now) {
        return Err(MatchRuleViolation::ChallengeExpired);
    }

    let to = if accept {
        MatchStatus::Accepted
    } else {
        MatchStatus::Declined
    };
    transition(state.status, to, "respond to the challenge")
}

// ---------------------------------------------------------------------------
// Recording lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The actor takes the recording lock and the match moves to `in_progress`.
    Started,
    /// The actor already holds the lock; nothing changes.
    AlreadyRecording,
}

/// Decide whether `actor_id` may start (or resume) recording.
pub fn plan_start(state: &MatchState, actor_id: DbId) -> Result<StartOutcome, MatchRuleViolation> {
    match state.status {
        MatchStatus::Accepted => match state.recording_by {
            Some(holder) if holder != actor_id => Err(MatchRuleViolation::RecordingHeldByOpponent),
            _ => transition(state.status, MatchStatus::InProgress, "start recording")
                .map(|_| StartOutcome::Started),
        },
        MatchStatus::InProgress if state.recording_by == Some(actor_id) => {
            Ok(StartOutcome::AlreadyRecording)
        }
        MatchStatus::InProgress => Err(MatchRuleViolation::RecordingHeldByOpponent),
        status => Err(MatchRuleViolation::InvalidTransition {
            action: "start recording",
            status,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRecordingOutcome {
    /// The lock is released and the match returns to `accepted`.
    Released,
    /// No lock was held; nothing changes.
    NothingToRelease,
}

pub fn plan_cancel_recording(
    state: &MatchState,
    actor_id: DbId,
) -> Result<CancelRecordingOutcome, MatchRuleViolation> {
    match state.recording_by {
        None => Ok(CancelRecordingOutcome::NothingToRelease),
        Some(holder) if holder != actor_id => Err(MatchRuleViolation::NotRecordingHolder {
            action: "cancel the recording",
        }),
        Some(_) => transition(state.status, MatchStatus::Accepted, "cancel the recording")
            .map(|_| CancelRecordingOutcome::Released),
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Check that `actor_id` may upload the match video now.
///
/// A stored video wins over every other reason so retries from a slow
/// client get the "already uploaded" answer.
pub fn plan_upload(state: &MatchState, actor_id: DbId) -> Result<(), MatchRuleViolation> {
    if state.has_video {
        return Err(MatchRuleViolation::AlreadyUploaded);
    }
    if state.status == MatchStatus::Uploading {
        return Err(MatchRuleViolation::UploadInProgress);
    }
    if state.status != MatchStatus::InProgress {
        return Err(MatchRuleViolation::InvalidTransition {
            action: "upload a video",
            status: state.status,
        });
    }
    if state.recording_by != Some(actor_id) {
        return Err(MatchRuleViolation::NotRecordingHolder {
            action: "upload the video",
        });
    }
    Ok(())
}

/// Validate the declared MIME type and size of an uploaded video.
pub fn validate_video(content_type: Option<&str>, size_bytes: usize) -> Result<(), CoreError> {
    match content_type {
        Some(ct) if ct.starts_with(VIDEO_CONTENT_TYPE_PREFIX) => {}
        Some(ct) => {
            return Err(CoreError::Validation(format!(
                "Invalid file type '{ct}'. Please upload a video."
            )))
        }
        None => {
            return Err(CoreError::Validation(
                "Missing content type. Please upload a video.".into(),
            ))
        }
    }
    if size_bytes == 0 {
        return Err(CoreError::Validation("Video file is empty".into()));
    }
    if size_bytes > MAX_VIDEO_BYTES {
        return Err(CoreError::Validation(format!(
            "Video too large ({} MB). Maximum size is 100 MB.",
            size_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Storage path hint for a match video.
pub fn video_path_hint(match_id: DbId, content_type: &str) -> String {
    let ext = match content_type {
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "mp4",
    };
    format!("matches/match_{match_id}.{ext}")
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Final scores, winner, and payout of an analysed match.
///
/// In a draw `winner_id` is `None`, both players are paid [`LOSER_XP`] and
/// nobody earns rank points; `rewards.winner_xp` then holds the per-player
/// draw payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub player1_score: i32,
    pub player2_score: i32,
    pub winner_id: Option<DbId>,
    pub rewards: RewardQuote,
}

pub fn decide_outcome(
    participants: &MatchParticipants,
    player1_score: i32,
    player2_score: i32,
) -> Result<MatchOutcome, MatchRuleViolation> {
    if player1_score < 0 || player2_score < 0 {
        return Err(MatchRuleViolation::InvalidScores(player1_score, player2_score));
    }

    let (winner_id, rewards) = match player1_score.cmp(&player2_score) {
        std::cmp::Ordering::Greater => (
            Some(participants.player1_id),
            calculate_rewards(player1_score, player2_score),
        ),
        std::cmp::Ordering::Less => (
            Some(participants.player2_id),
            calculate_rewards(player2_score, player1_score),
        ),
        std::cmp::Ordering::Equal => (
            None,
            RewardQuote {
                winner_xp: LOSER_XP,
                winner_rp: 0,
                loser_xp: LOSER_XP,
            },
        ),
    };

    Ok(MatchOutcome {
        player1_score,
        player2_score,
        winner_id,
        rewards,
    })
}
