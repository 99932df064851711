//! PendingCommit and CommitLog
//!
//! A [`PendingCommit`] is one unit of reconciliation work. Its status column is
//! the only concurrency guard between overlapping worker invocations.
//!
//! # State machine
//!
//! ```text
//! pending ──→ processing ──→ done
//!                 │
//!                 └────────→ error ──→ processing (next pass)
//! ```
//!
//! `pending` and `error` are both backlog states: the worker claims either.
//! `done` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::day::DayId;
use crate::digest::LeaderboardDigest;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{TxRef, Winners};

/// Note carried by producer-side checkpoint commits
pub const CHECKPOINT_NOTE: &str = "leaderboard digest computed by worker";

/// Commit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub Uuid);

impl CommitId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of reconciliation work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// Anchor a digest of the current leaderboard
    Checkpoint,
    /// Commit the day's winners and trigger prize distribution
    Finalize,
}

impl CommitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// Enqueued, never attempted
    #[default]
    Pending,
    /// Claimed by a worker invocation
    Processing,
    /// Anchored on-chain (or a no-op checkpoint)
    Done,
    /// Last attempt failed, will be retried
    Error,
}

impl CommitStatus {
    /// Visible to the worker as work to do
    pub fn is_backlog(&self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether the state machine allows moving to `target`
    pub fn can_transition_to(&self, target: CommitStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing)
                | (Self::Error, Self::Processing)
                | (Self::Processing, Self::Done)
                | (Self::Processing, Self::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a pending commit, shape fixed per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitPayload {
    /// The digest is computed at processing time from the projection
    Checkpoint { note: String },
    /// Winners frozen at enqueue time
    Finalize(Winners),
}

impl CommitPayload {
    pub fn checkpoint() -> Self {
        Self::Checkpoint {
            note: CHECKPOINT_NOTE.to_string(),
        }
    }

    pub fn kind(&self) -> CommitKind {
        match self {
            Self::Checkpoint { .. } => CommitKind::Checkpoint,
            Self::Finalize(_) => CommitKind::Finalize,
        }
    }
}

/// Queued unit of reconciliation work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommit {
    /// Commit id
    pub id: CommitId,
    /// Day the work belongs to
    pub day_id: DayId,
    /// Work payload (determines the kind)
    pub payload: CommitPayload,
    /// Current status
    pub status: CommitStatus,
    /// Reason of the last failure
    pub error_message: Option<String>,
    /// Number of claims so far
    pub attempts: u32,
    /// Enqueue time, FIFO key
    pub created_at: DateTime<Utc>,
    /// Time of the current or last claim
    pub claimed_at: Option<DateTime<Utc>>,
    /// Time the commit reached `done`
    pub processed_at: Option<DateTime<Utc>>,
}

impl PendingCommit {
    pub fn new(day_id: DayId, payload: CommitPayload) -> Self {
        Self {
            id: CommitId::generate(),
            day_id,
            payload,
            status: CommitStatus::Pending,
            error_message: None,
            attempts: 0,
            created_at: Utc::now(),
            claimed_at: None,
            processed_at: None,
        }
    }

    pub fn checkpoint(day_id: DayId) -> Self {
        Self::new(day_id, CommitPayload::checkpoint())
    }

    pub fn finalize(day_id: DayId, winners: Winners) -> Self {
        Self::new(day_id, CommitPayload::Finalize(winners))
    }

    pub fn kind(&self) -> CommitKind {
        self.payload.kind()
    }

    fn transition(&mut self, target: CommitStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    /// Backlog → processing
    pub fn claim(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(CommitStatus::Processing)?;
        self.attempts += 1;
        self.claimed_at = Some(now);
        Ok(())
    }

    /// Processing → done
    pub fn complete(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(CommitStatus::Done)?;
        self.error_message = None;
        self.processed_at = Some(now);
        Ok(())
    }

    /// Processing → error
    pub fn fail(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.transition(CommitStatus::Error)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Claimed before `cutoff` and never completed
    pub fn is_stale_claim(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == CommitStatus::Processing
            && self.claimed_at.map_or(true, |at| at < cutoff)
    }
}

/// Payload recorded in the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitLogPayload {
    Checkpoint {
        digest: LeaderboardDigest,
        entries: usize,
    },
    Finalize(Winners),
}

impl CommitLogPayload {
    pub fn kind(&self) -> CommitKind {
        match self {
            Self::Checkpoint { .. } => CommitKind::Checkpoint,
            Self::Finalize(_) => CommitKind::Finalize,
        }
    }
}

/// Append-only audit record of a confirmed ledger write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
    pub id: Uuid,
    pub day_id: DayId,
    /// Commit that produced the write
    pub commit_id: CommitId,
    pub tx_hash: TxRef,
    pub payload: CommitLogPayload,
    pub created_at: DateTime<Utc>,
}

impl CommitLog {
    pub fn new(commit: &PendingCommit, tx_hash: TxRef, payload: CommitLogPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            day_id: commit.day_id,
            commit_id: commit.id,
            tx_hash,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> CommitKind {
        self.payload.kind()
    }
}
