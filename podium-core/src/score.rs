//! Score submissions and the best-score projection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::day::DayId;
use crate::player::PlayerId;

/// One raw score, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    /// Submission id
    pub id: Uuid,
    /// Submitting wallet
    pub player: PlayerId,
    /// Day the session belongs to
    pub day_id: DayId,
    /// Score as reported by the game session
    pub raw_score: u64,
    /// When the submission was accepted
    pub submitted_at: DateTime<Utc>,
}

impl ScoreSubmission {
    pub fn new(player: PlayerId, day_id: DayId, raw_score: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            player,
            day_id,
            raw_score,
            submitted_at: Utc::now(),
        }
    }
}

/// Best score of one player on one day
///
/// Invariant: `best_score` equals the maximum `raw_score` over all submissions
/// for `(player, day_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestScore {
    pub player: PlayerId,
    pub day_id: DayId,
    pub best_score: u64,
    pub updated_at: DateTime<Utc>,
}

impl BestScore {
    /// Projection row seeded from a submission
    pub fn from_submission(submission: &ScoreSubmission) -> Self {
        Self {
            player: submission.player.clone(),
            day_id: submission.day_id,
            best_score: submission.raw_score,
            updated_at: submission.submitted_at,
        }
    }

    /// Whether `submission` must replace `existing` in the projection
    ///
    /// Strictly greater only: an equal score leaves the row untouched.
    pub fn is_improved_by(existing: Option<&BestScore>, submission: &ScoreSubmission) -> bool {
        match existing {
            None => true,
            Some(row) => submission.raw_score > row.best_score,
        }
    }
}

/// Leaderboard order: score descending, then player ascending
pub fn leaderboard_order(a: &BestScore, b: &BestScore) -> Ordering {
    b.best_score
        .cmp(&a.best_score)
        .then_with(|| a.player.cmp(&b.player))
}

/// Sort rows into leaderboard order in place
pub fn rank(rows: &mut [BestScore]) {
    rows.sort_by(leaderboard_order);
}
