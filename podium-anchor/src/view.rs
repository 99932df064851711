//! Leaderboard view
//!
//! Read model for a day: the ranked top entries plus the on-chain trail of
//! that day (checkpoint and finalize transactions).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AnchorResult;
use crate::storage::LeaderboardStore;
use podium_core::{
    leaderboard_digest, ranked, CommitLogPayload, DayId, LeaderboardDigest, PlayerId, TxRef,
};

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    /// 1-based rank
    pub rank: usize,
    pub player: PlayerId,
    pub score: u64,
}

/// Anchored checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointRecord {
    pub tx_hash: TxRef,
    pub digest: LeaderboardDigest,
    pub entries: usize,
    pub anchored_at: DateTime<Utc>,
}

/// Leaderboard of one day
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardView {
    pub day_id: DayId,
    /// Distinct players with a score
    pub players: usize,
    pub entries: Vec<RankedEntry>,
    /// Digest of the full current projection
    pub current_digest: LeaderboardDigest,
    pub checkpoints: Vec<CheckpointRecord>,
    pub finalize_tx: Option<TxRef>,
}

impl LeaderboardView {
    /// Build the view of `day_id` with at most `limit` entries
    pub async fn load<S: LeaderboardStore + ?Sized>(
        store: &S,
        day_id: DayId,
        limit: usize,
    ) -> AnchorResult<Self> {
        let rows = store.best_scores_for_day(day_id).await?;
        let current_digest = leaderboard_digest(&rows)?;
        let players = rows.len();

        let entries = ranked(&rows)
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, row)| RankedEntry {
                rank: i + 1,
                player: row.player,
                score: row.best_score,
            })
            .collect();

        let mut checkpoints = Vec::new();
        let mut finalize_tx = None;
        for log in store.commit_logs_for_day(day_id, None).await? {
            match log.payload {
                CommitLogPayload::Checkpoint { digest, entries } => checkpoints.push(CheckpointRecord {
                    tx_hash: log.tx_hash,
                    digest,
                    entries,
                    anchored_at: log.created_at,
                }),
                CommitLogPayload::Finalize(_) => finalize_tx = Some(log.tx_hash),
            }
        }
        checkpoints.sort_by_key(|c| c.anchored_at);

        Ok(Self {
            day_id,
            players,
            entries,
            current_digest,
            checkpoints,
            finalize_tx,
        })
    }

    /// Whether the latest anchored digest matches the current projection
    pub fn is_anchored(&self) -> bool {
        self.checkpoints
            .last()
            .map_or(false, |c| c.digest == self.current_digest)
    }
}
