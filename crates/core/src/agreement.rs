//! Post-analysis confirmation: both players agree, or one disputes.

use crate::error::CoreError;
use crate::match_lifecycle::{
    MatchParticipants, MatchRole, MatchRuleViolation, MatchState, MatchStatus,
};
use crate::rewards::RewardQuote;
use crate::types::DbId;

/// Maximum length of a dispute reason.
pub const MAX_DISPUTE_REASON_LEN: usize = 200;

/// Maximum length of free-text dispute details.
pub const MAX_DISPUTE_DETAILS_LEN: usize = 2000;

/// Result of a participant's agreement submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementOutcome {
    /// The actor's flag is set; `both_agreed` tells whether stats may finalise.
    Recorded { both_agreed: bool },
    /// The actor rejected the result; the match moves to `disputed`.
    Disputed,
}

pub fn plan_agreement(
    state: &MatchState,
    role: MatchRole,
    agree: bool,
) -> Result<AgreementOutcome, MatchRuleViolation> {
    if !agree {
        plan_dispute(state)?;
        return Ok(AgreementOutcome::Disputed);
    }
    match state.status {
        MatchStatus::Completed => {}
        MatchStatus::Disputed => return Err(MatchRuleViolation::AlreadyDisputed),
        status => {
            return Err(MatchRuleViolation::InvalidTransition {
                action: "confirm the result",
                status,
            })
        }
    }

    let both_agreed = match role {
        MatchRole::Challenger => state.player2_agreed,
        MatchRole::Opponent => state.player1_agreed,
    };
    Ok(AgreementOutcome::Recorded { both_agreed })
}

/// A result may be disputed once analysis has started or finished.
pub fn plan_dispute(state: &MatchState) -> Result<(), MatchRuleViolation> {
    match state.status {
        MatchStatus::Completed | MatchStatus::Analyzing => Ok(()),
        MatchStatus::Disputed => Err(MatchRuleViolation::AlreadyDisputed),
        status => Err(MatchRuleViolation::InvalidTransition {
            action: "dispute the result",
            status,
        }),
    }
}

/// Trim and bound the optional dispute texts.
pub fn validate_dispute_text(
    reason: Option<&str>,
    details: Option<&str>,
) -> Result<(Option<String>, Option<String>), CoreError> {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let details = details.map(str::trim).filter(|d| !d.is_empty());

    if let Some(r) = reason {
        if r.chars().count() > MAX_DISPUTE_REASON_LEN {
            return Err(CoreError::Validation(format!(
                "Dispute reason must be at most {MAX_DISPUTE_REASON_LEN} characters"
            )));
        }
    }
    if let Some(d) = details {
        if d.chars().count() > MAX_DISPUTE_DETAILS_LEN {
            return Err(CoreError::Validation(format!(
                "Dispute details must be at most {MAX_DISPUTE_DETAILS_LEN} characters"
            )));
        }
    }
    Ok((reason.map(String::from), details.map(String::from)))
}

/// Per-player stat change applied when both participants agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatDelta {
    pub user_id: DbId,
    pub xp: i32,
    pub rank_points: i32,
    pub won: bool,
}

/// Stat changes for a finalised match.
///
/// A scoreless match (analysis failed) still counts as played but pays
/// nothing. A draw pays both players the stored per-player amount.
pub fn stat_deltas(
    participants: &MatchParticipants,
    winner_id: Option<DbId>,
    rewards: Option<RewardQuote>,
) -> [StatDelta; 2] {
    let delta_for = |user_id: DbId| match (rewards, winner_id) {
        (None, _) => StatDelta {
            user_id,
            xp: 0,
            rank_points: 0,
            won: false,
        },
        (Some(quote), Some(winner)) if winner == user_id => StatDelta {
            user_id,
            xp: quote.winner_xp,
            rank_points: quote.winner_rp,
            won: true,
        },
        (Some(quote), Some(_)) => StatDelta {
            user_id,
            xp: quote.loser_xp,
            rank_points: 0,
            won: false,
        },
        (Some(quote), None) => StatDelta {
            user_id,
            xp: quote.winner_xp,
            rank_points: 0,
            won: false,
        },
    };

    [
        delta_for(participants.player1_id),
        delta_for(participants.player2_id),
    ]
}
