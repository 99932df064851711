//! Score intake
//!
//! Producer boundary for score submissions. A submission is validated,
//! appended to the raw log, folded into the best-score projection and
//! followed by a checkpoint commit for its day. Nothing is written when
//! validation fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PodiumConfig;
use crate::error::{AnchorError, AnchorResult};
use crate::ledger::LedgerClient;
use crate::storage::{EnqueueOutcome, LeaderboardStore, ProjectionUpdate};
use podium_core::{CommitId, CoreError, DayId, PendingCommit, PlayerId, ScoreSubmission};

/// Submission as received from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Wallet address, any hex case
    pub player: String,
    /// Final score of the run
    pub score: i64,
    /// Explicit day (`YYYYMMDD`) for backfill and test runs
    #[serde(default)]
    pub day_id: Option<i64>,
}

/// Result of an accepted submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub submission_id: uuid::Uuid,
    pub player: PlayerId,
    pub day_id: DayId,
    /// Best score of the player for the day after this submission
    pub best_score: u64,
    /// Whether this submission raised the best score
    pub improved: bool,
    /// Checkpoint commit enqueued for the day
    pub checkpoint_id: CommitId,
}

/// Intake options
#[derive(Debug, Clone, Default)]
pub struct IntakeOptions {
    /// Reject players without a paid entry on the ledger
    pub require_entry: bool,
    /// Fixed day for test runs
    pub day_override: Option<DayId>,
}

impl IntakeOptions {
    pub fn from_config(config: &PodiumConfig) -> Self {
        Self {
            require_entry: config.require_entry,
            day_override: config.test_day_id,
        }
    }
}

/// Score intake service
pub struct ScoreIntake<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    options: IntakeOptions,
}

impl<S: LeaderboardStore, L: LedgerClient> ScoreIntake<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, options: IntakeOptions) -> Self {
        Self {
            store,
            ledger,
            options,
        }
    }

    /// Explicit day, then the configured override, then the UTC day of `now`
    fn day_for(&self, explicit: Option<i64>, now: DateTime<Utc>) -> AnchorResult<DayId> {
        if let Some(value) = explicit {
            return Ok(DayId::new(value)?);
        }
        match self.options.day_override {
            Some(day) => Ok(day),
            None => Ok(DayId::current(now)?),
        }
    }

    /// Accept a score submitted at `now`
    pub async fn submit(&self, request: &SubmitRequest, now: DateTime<Utc>) -> AnchorResult<SubmitReceipt> {
        let player = PlayerId::parse(&request.player)?;
        let raw_score = u64::try_from(request.score).map_err(|_| {
            CoreError::InvalidScore(format!("score must be a non-negative integer, got {}", request.score))
        })?;
        let day_id = self.day_for(request.day_id, now)?;

        if self.options.require_entry && !self.ledger.has_entered(day_id, &player).await? {
            return Err(AnchorError::NotEntered {
                player: player.to_string(),
                day_id,
            });
        }

        let mut submission = ScoreSubmission::new(player.clone(), day_id, raw_score);
        submission.submitted_at = now;
        self.store.insert_submission(&submission).await?;

        let update = self.store.upsert_best_score(&submission).await?;
        match &update {
            ProjectionUpdate::Inserted(best) => {
                debug!("First score {} for {} on day {}", best.best_score, player, day_id)
            }
            ProjectionUpdate::Raised { previous, current } => info!(
                "Best score for {} on day {} raised {} -> {}",
                player, day_id, previous, current.best_score
            ),
            ProjectionUpdate::Unchanged(best) => debug!(
                "Score {} for {} on day {} does not beat {}",
                raw_score, player, day_id, best.best_score
            ),
        }

        let checkpoint = PendingCommit::checkpoint(day_id);
        match self.store.enqueue_commit(&checkpoint).await? {
            EnqueueOutcome::Enqueued => {}
            EnqueueOutcome::Duplicate(existing) => {
                return Err(AnchorError::Storage(format!(
                    "checkpoint enqueue refused, conflicting commit {}",
                    existing.id
                )));
            }
        }

        Ok(SubmitReceipt {
            submission_id: submission.id,
            player,
            day_id,
            best_score: update.best().best_score,
            improved: update.changed(),
            checkpoint_id: checkpoint.id,
        })
    }
}
