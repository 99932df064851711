//! Podium Core - Daily Leaderboard Types
//!
//! Pure data model shared by the Podium reconciliation pipeline. Nothing in
//! this crate performs I/O.
//!
//! # Objects
//!
//! - [`DayId`]: UTC calendar day key (`YYYYMMDD`) partitioning all state
//! - [`ScoreSubmission`] / [`BestScore`]: raw scores and their per-day maximum
//! - [`PendingCommit`]: queued checkpoint or finalize work with a status machine
//! - [`CommitLog`]: audit record of a confirmed ledger write
//! - [`LedgerDayInfo`] / [`PrizeSplit`]: ledger-owned day state and payout math
//!
//! # Leaderboard digest
//!
//! [`leaderboard_digest`] hashes the ranked best-score snapshot of a day. The
//! same snapshot always yields the same digest regardless of row order.

pub mod commit;
pub mod day;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod player;
pub mod score;

pub use commit::{
    CommitId, CommitKind, CommitLog, CommitLogPayload, CommitPayload, CommitStatus,
    PendingCommit, CHECKPOINT_NOTE,
};
pub use day::{is_valid_day_id, parse_day_id, DayId};
pub use digest::{canonical_bytes, leaderboard_digest, ranked, LeaderboardDigest};
pub use error::{CoreError, CoreResult};
pub use ledger::{
    format_token_amount, LedgerDayInfo, PrizeSplit, TxRef, Winners, WINNER_SLOTS,
};
pub use player::PlayerId;
pub use score::{leaderboard_order, rank, BestScore, ScoreSubmission};
