//! XP / RP payouts for a finished 1v1 match.

use serde::{Deserialize, Serialize};

/// XP every participant receives for finishing a match.
pub const BASE_XP: i32 = 50;

/// Extra XP for winning, before the margin bonus.
pub const WIN_BONUS_XP: i32 = 50;

/// XP per point of winning margin.
pub const XP_PER_MARGIN_POINT: i32 = 10;

/// Ceiling on total winner XP.
pub const MAX_WINNER_XP: i32 = 200;

/// Rank points per point of winning margin.
pub const RP_PER_MARGIN_POINT: i32 = 5;

/// Ceiling on winner rank points.
pub const MAX_WINNER_RP: i32 = 50;

/// Fixed XP for the losing player, independent of margin.
pub const LOSER_XP: i32 = BASE_XP;

/// Payout for a completed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardQuote {
    pub winner_xp: i32,
    pub winner_rp: i32,
    pub loser_xp: i32,
}

/// Compute the payout for a `winner_score`/`loser_score` pair.
///
/// Negative scores are treated as zero and a loser score above the winner
/// score is treated as a zero margin, so the function is total.
pub fn calculate_rewards(winner_score: i32, loser_score: i32) -> RewardQuote {
    let margin = winner_score.max(0).saturating_sub(loser_score.max(0)).max(0);

    let margin_bonus = margin.saturating_mul(XP_PER_MARGIN_POINT);
    let winner_xp = BASE_XP
        .saturating_add(WIN_BONUS_XP)
        .saturating_add(margin_bonus)
        .min(MAX_WINNER_XP);
    let winner_rp = margin.saturating_mul(RP_PER_MARGIN_POINT).min(MAX_WINNER_RP);

    RewardQuote {
        winner_xp,
        winner_rp,
        loser_xp: LOSER_XP,
    }
}
