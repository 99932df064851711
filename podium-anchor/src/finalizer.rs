//! Day finalizer
//!
//! Decides whether a day may be finalized and, if so, enqueues the single
//! finalize commit for it. Winners are frozen at enqueue time from the
//! best-score projection; the worker later submits them to the ledger.
//!
//! Eligibility:
//! - no finalize commit exists for the day (the store refuses a second one)
//! - the ledger latch is not set
//! - at least `min_players` distinct players (never fewer than three)

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FinalizePolicy;
use crate::error::{AnchorError, AnchorResult};
use crate::ledger::LedgerClient;
use crate::storage::{EnqueueOutcome, LeaderboardStore};
use podium_core::{
    ranked, CommitId, CommitStatus, CoreError, DayId, PendingCommit, Winners, WINNER_SLOTS,
};

/// Outcome of a finalize request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// Finalize commit enqueued with these winners
    Enqueued { commit_id: CommitId, winners: Winners },
    /// Day already finalized (by a done commit, or per the ledger latch)
    AlreadyFinalized { commit_id: Option<CommitId> },
    /// A finalize commit for the day is already in the queue
    AlreadyQueued { commit_id: CommitId, status: CommitStatus },
    /// Too few players to fill the podium
    NotEnoughPlayers { players: usize, required: usize },
}

impl FinalizeOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    /// Status an HTTP producer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Enqueued { .. } => 202,
            Self::AlreadyFinalized { .. } | Self::AlreadyQueued { .. } => 409,
            Self::NotEnoughPlayers { .. } => 422,
        }
    }

    fn from_existing(existing: &PendingCommit) -> Self {
        if existing.status == CommitStatus::Done {
            Self::AlreadyFinalized {
                commit_id: Some(existing.id),
            }
        } else {
            Self::AlreadyQueued {
                commit_id: existing.id,
                status: existing.status,
            }
        }
    }
}

/// Day finalizer
pub struct DayFinalizer<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    policy: FinalizePolicy,
}

impl<S: LeaderboardStore, L: LedgerClient> DayFinalizer<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, policy: FinalizePolicy) -> Self {
        Self {
            store,
            ledger,
            policy,
        }
    }

    fn required_players(&self) -> usize {
        self.policy.min_players.max(WINNER_SLOTS)
    }

    /// Request finalization of `day_id`
    pub async fn request_finalize(&self, day_id: DayId) -> AnchorResult<FinalizeOutcome> {
        if let Some(existing) = self.store.finalize_commit_for_day(day_id).await? {
            let outcome = FinalizeOutcome::from_existing(&existing);
            info!("Finalize for day {} not enqueued: {:?}", day_id, outcome);
            return Ok(outcome);
        }

        if self.policy.check_ledger {
            match self.ledger.read_day_info(day_id).await {
                Ok(info) if info.finalized => {
                    info!("Day {} already finalized on the ledger", day_id);
                    return Ok(FinalizeOutcome::AlreadyFinalized { commit_id: None });
                }
                Ok(_) => {}
                // The worker re-checks the latch before writing
                Err(e) => warn!("Could not read ledger state for day {}: {}", day_id, e),
            }
        }

        let rows = ranked(&self.store.best_scores_for_day(day_id).await?);
        let required = self.required_players();
        let winners = match Winners::from_ranked(&rows) {
            Some(winners) if rows.len() >= required => winners,
            _ => {
                info!(
                    "Day {} has {} players, {} required to finalize",
                    day_id,
                    rows.len(),
                    required
                );
                return Ok(FinalizeOutcome::NotEnoughPlayers {
                    players: rows.len(),
                    required,
                });
            }
        };

        let commit = PendingCommit::finalize(day_id, winners.clone());
        match self.store.enqueue_commit(&commit).await? {
            EnqueueOutcome::Enqueued => {
                info!(
                    "Enqueued finalize {} for day {}: {:?}",
                    commit.id, day_id, winners.scores
                );
                Ok(FinalizeOutcome::Enqueued {
                    commit_id: commit.id,
                    winners,
                })
            }
            EnqueueOutcome::Duplicate(existing) => Ok(FinalizeOutcome::from_existing(&existing)),
        }
    }

    /// Finalize the day before the one containing `now`
    pub async fn finalize_previous_day(&self, now: DateTime<Utc>) -> AnchorResult<FinalizeOutcome> {
        let today = DayId::current(now)?;
        let yesterday = today.previous().ok_or_else(|| {
            AnchorError::Validation(CoreError::DateOutOfRange(format!("no day before {}", today)))
        })?;
        info!("Rollover: finalizing day {}", yesterday);
        self.request_finalize(yesterday).await
    }
}
