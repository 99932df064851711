//! Podium Anchor - Leaderboard Reconciliation Pipeline
//!
//! Keeps the off-chain daily leaderboard and the on-chain tournament contract
//! in agreement. High-frequency score writes stay off-chain; a worker
//! periodically anchors digests of the leaderboard and, once a day has
//! closed, commits its winners exactly once.
//!
//! # Architecture
//!
//! - **Score Intake**: validates submissions, maintains the best-score projection
//! - **Commit Queue**: durable `pending → processing → done | error` work items
//! - **Day Finalizer**: eligibility policy and the single finalize commit per day
//! - **Reconciliation Worker**: drains the queue against the ledger
//! - **Ledger Client**: JSON-RPC contract client, time-bounded
//!
//! ```text
//! submit ─→ submissions ─→ best_scores ─→ checkpoint commit ─┐
//!                                                            ├─→ worker ─→ ledger
//! finalize request ─→ eligibility ─→ finalize commit ────────┘        └─→ commit_logs
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use podium_anchor::{InMemoryLedger, MemoryStore, PodiumConfig, PodiumService, SubmitRequest};
//!
//! async fn example() -> podium_anchor::AnchorResult<()> {
//!     let service = PodiumService::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(InMemoryLedger::new()),
//!         &PodiumConfig::development(),
//!     );
//!
//!     let request = SubmitRequest {
//!         player: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
//!         score: 1200,
//!         day_id: None,
//!     };
//!     service.submit(&request, chrono::Utc::now()).await?;
//!
//!     let report = service.run_worker().await?;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod finalizer;
pub mod intake;
pub mod ledger;
pub mod retry;
pub mod storage;
pub mod view;
pub mod worker;

pub use config::{FinalizePolicy, LedgerRpcConfig, PodiumConfig, WorkerConfig};
pub use error::{AnchorError, AnchorResult};
pub use finalizer::{DayFinalizer, FinalizeOutcome};
pub use intake::{IntakeOptions, ScoreIntake, SubmitReceipt, SubmitRequest};
pub use ledger::{
    BoundedLedger, InMemoryLedger, JsonRpcLedgerClient, LedgerCall, LedgerClient, LocalSigner,
};
pub use retry::RetryStrategy;
pub use storage::{
    EnqueueOutcome, LeaderboardStore, MemoryStore, ProjectionUpdate, QueueStats, SledStore,
};
pub use view::{CheckpointRecord, LeaderboardView, RankedEntry};
pub use worker::{ItemOutcome, ItemReport, ReconciliationWorker, RunBudget, WorkerReport};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use podium_core::{DayId, LedgerDayInfo, PendingCommit};

/// Podium service
///
/// Wires intake, finalizer and worker over one store and one ledger.
pub struct PodiumService<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    intake: ScoreIntake<S, L>,
    finalizer: DayFinalizer<S, L>,
    worker: ReconciliationWorker<S, L>,
}

impl<S: LeaderboardStore, L: LedgerClient> PodiumService<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, config: &PodiumConfig) -> Self {
        info!(
            "Podium service: checkpoint batch {}, finalize batch {}, min players {}",
            config.worker.checkpoint_batch_size,
            config.worker.finalize_batch_size,
            config.finalize.min_players
        );

        Self {
            intake: ScoreIntake::new(
                store.clone(),
                ledger.clone(),
                IntakeOptions::from_config(config),
            ),
            finalizer: DayFinalizer::new(store.clone(), ledger.clone(), config.finalize.clone()),
            worker: ReconciliationWorker::new(store.clone(), ledger.clone(), config.worker.clone()),
            store,
            ledger,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Accept a score
    pub async fn submit(&self, request: &SubmitRequest, now: DateTime<Utc>) -> AnchorResult<SubmitReceipt> {
        self.intake.submit(request, now).await
    }

    /// Request finalization of a day
    pub async fn request_finalize(&self, day_id: DayId) -> AnchorResult<FinalizeOutcome> {
        self.finalizer.request_finalize(day_id).await
    }

    /// Finalize the day before `now`
    pub async fn finalize_previous_day(&self, now: DateTime<Utc>) -> AnchorResult<FinalizeOutcome> {
        self.finalizer.finalize_previous_day(now).await
    }

    /// Run the worker once with the configured deadline
    pub async fn run_worker(&self) -> AnchorResult<WorkerReport> {
        self.worker.run_once().await
    }

    /// Run the worker once within `budget`
    pub async fn run_worker_with(&self, budget: &RunBudget) -> AnchorResult<WorkerReport> {
        self.worker.run(budget).await
    }

    /// Leaderboard of a day
    pub async fn leaderboard(&self, day_id: DayId, limit: usize) -> AnchorResult<LeaderboardView> {
        LeaderboardView::load(self.store.as_ref(), day_id, limit).await
    }

    /// Ledger state of a day
    pub async fn day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo> {
        self.ledger.read_day_info(day_id).await
    }

    pub async fn stats(&self) -> AnchorResult<QueueStats> {
        self.store.get_stats().await
    }

    /// Commits, optionally of a single day
    pub async fn list_commits(&self, day_id: Option<DayId>) -> AnchorResult<Vec<PendingCommit>> {
        self.store.list_commits(day_id).await
    }
}
