//! 对账 Worker
//!
//! 单次调用处理一批 checkpoint 再处理一批 finalize，然后返回。由外部调度器
//! 反复调用（cron、CLI、定时任务），每次调用都必然结束。
//!
//! # 处理流程
//!
//! 1. 将租约过期的 processing 行转回 error
//! 2. checkpoint：认领 → 读取投影 → 计算摘要 → 写账本 → 审计日志 → done
//! 3. finalize：认领 → 读取账本 latch → 写账本 → 审计日志 → done
//!
//! 单个提交失败只会把该行标记为 error，不影响同批其他提交。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{AnchorError, AnchorResult};
use crate::ledger::LedgerClient;
use crate::storage::LeaderboardStore;
use podium_core::{
    leaderboard_digest, CommitId, CommitKind, CommitLog, CommitLogPayload, CommitPayload, DayId,
    PendingCommit, TxRef,
};

/// 单次调用的时间预算
#[derive(Debug, Clone)]
pub struct RunBudget {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RunBudget {
    pub fn new(limit: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + limit,
            cancel,
        }
    }

    /// 仅受时间限制
    pub fn with_deadline(limit: Duration) -> Self {
        Self::new(limit, CancellationToken::new())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 预算耗尽时返回原因
    pub fn exhausted(&self) -> Option<&'static str> {
        if self.cancel.is_cancelled() {
            Some("cancelled")
        } else if Instant::now() >= self.deadline {
            Some("deadline reached")
        } else {
            None
        }
    }
}

/// 单个提交的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// 账本写入已确认
    Anchored { tx_hash: TxRef },
    /// 当天没有成绩，checkpoint 直接完成
    NoOp,
    /// 账本已 finalized，未重复写入
    Reconciled,
    /// 已被其他调用认领
    Skipped,
    /// 失败，行已标记为 error
    Failed { reason: String },
}

/// 单个提交的报告
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub commit_id: CommitId,
    pub day_id: DayId,
    pub kind: CommitKind,
    pub outcome: ItemOutcome,
}

/// 单次调用报告
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 租约过期后释放的行数
    pub released_claims: usize,
    pub items: Vec<ItemReport>,
    /// 预算耗尽提前结束的原因
    pub stopped_early: Option<String>,
}

impl WorkerReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            released_claims: 0,
            items: Vec::new(),
            stopped_early: None,
        }
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }

    pub fn anchored(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Anchored { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// 没有任何待处理工作
    pub fn is_idle(&self) -> bool {
        self.items.is_empty() && self.released_claims == 0
    }

    /// 无失败且未提前结束
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.stopped_early.is_none()
    }
}

/// 对账 Worker
pub struct ReconciliationWorker<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    config: WorkerConfig,
}

impl<S: LeaderboardStore, L: LedgerClient> ReconciliationWorker<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, config: WorkerConfig) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// 使用配置中的截止时间运行一次
    pub async fn run_once(&self) -> AnchorResult<WorkerReport> {
        self.run(&RunBudget::with_deadline(self.config.deadline())).await
    }

    /// 运行一次：checkpoint 批次，然后 finalize 批次
    pub async fn run(&self, budget: &RunBudget) -> AnchorResult<WorkerReport> {
        let mut report = WorkerReport::begin();

        let cutoff = Utc::now() - self.config.claim_lease();
        report.released_claims = self.store.release_stale_claims(cutoff).await?;
        if report.released_claims > 0 {
            warn!("Released {} stale claims", report.released_claims);
        }

        for (kind, batch_size) in [
            (CommitKind::Checkpoint, self.config.checkpoint_batch_size),
            (CommitKind::Finalize, self.config.finalize_batch_size),
        ] {
            let batch = self.store.list_backlog(kind, batch_size).await?;
            debug!("Processing {} {} commits", batch.len(), kind);

            for commit in batch {
                if let Some(reason) = budget.exhausted() {
                    warn!("Worker stopping early: {}", reason);
                    report.stopped_early = Some(reason.to_string());
                    break;
                }
                report.items.push(self.process(commit).await);
            }
            if report.stopped_early.is_some() {
                break;
            }
        }

        report.finished_at = Utc::now();
        if !report.is_idle() {
            info!(
                "Worker run finished: {} items, {} anchored, {} failed",
                report.items.len(),
                report.anchored(),
                report.failed()
            );
        }
        Ok(report)
    }

    /// 处理单个提交，错误都转为报告项
    async fn process(&self, commit: PendingCommit) -> ItemReport {
        let mut item = ItemReport {
            commit_id: commit.id,
            day_id: commit.day_id,
            kind: commit.kind(),
            outcome: ItemOutcome::Skipped,
        };

        let claimed = match self.store.claim_commit(&commit.id, Utc::now()).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!("Commit {} claimed elsewhere, skipping", commit.id);
                return item;
            }
            Err(e) => {
                error!("Failed to claim commit {}: {}", commit.id, e);
                item.outcome = ItemOutcome::Failed {
                    reason: e.to_string(),
                };
                return item;
            }
        };

        let result = match &claimed.payload {
            CommitPayload::Checkpoint { .. } => self.anchor_checkpoint(&claimed).await,
            CommitPayload::Finalize(_) => self.anchor_finalize(&claimed).await,
        };

        item.outcome = match result {
            Ok(outcome) => match self.store.complete_commit(&claimed.id, Utc::now()).await {
                Ok(_) => {
                    info!(
                        "{} commit {} for day {} done: {:?}",
                        item.kind, claimed.id, claimed.day_id, outcome
                    );
                    outcome
                }
                Err(e) => {
                    // 账本已写入但状态未落盘，租约过期后重试
                    error!("Failed to complete commit {}: {}", claimed.id, e);
                    ItemOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    "{} commit {} for day {} failed (attempt {}): {}",
                    item.kind, claimed.id, claimed.day_id, claimed.attempts, reason
                );
                if let Err(mark_err) = self.store.fail_commit(&claimed.id, &reason).await {
                    error!("Failed to mark commit {} as error: {}", claimed.id, mark_err);
                }
                ItemOutcome::Failed { reason }
            }
        };
        item
    }

    async fn anchor_checkpoint(&self, commit: &PendingCommit) -> AnchorResult<ItemOutcome> {
        let rows = self.store.best_scores_for_day(commit.day_id).await?;
        if rows.is_empty() {
            return Ok(ItemOutcome::NoOp);
        }

        let digest = leaderboard_digest(&rows)?;
        debug!("Day {} digest {} over {} entries", commit.day_id, digest, rows.len());
        let tx_hash = self.ledger.write_checkpoint(commit.day_id, &digest).await?;

        let log = CommitLog::new(
            commit,
            tx_hash.clone(),
            CommitLogPayload::Checkpoint {
                digest,
                entries: rows.len(),
            },
        );
        self.store.append_commit_log(&log).await?;
        Ok(ItemOutcome::Anchored { tx_hash })
    }

    async fn anchor_finalize(&self, commit: &PendingCommit) -> AnchorResult<ItemOutcome> {
        let CommitPayload::Finalize(winners) = &commit.payload else {
            return Err(AnchorError::Storage(format!(
                "commit {} has no finalize payload",
                commit.id
            )));
        };

        let info = self.ledger.read_day_info(commit.day_id).await?;
        if info.finalized {
            warn!(
                "Day {} already finalized on the ledger, marking commit {} done without writing",
                commit.day_id, commit.id
            );
            return Ok(ItemOutcome::Reconciled);
        }

        let tx_hash = self.ledger.write_finalize(commit.day_id, winners).await?;
        let log = CommitLog::new(
            commit,
            tx_hash.clone(),
            CommitLogPayload::Finalize(winners.clone()),
        );
        self.store.append_commit_log(&log).await?;
        Ok(ItemOutcome::Anchored { tx_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::storage::MemoryStore;
    use podium_core::{CommitStatus, PlayerId, ScoreSubmission, Winners};

    fn day() -> DayId {
        DayId::new(20250601).unwrap()
    }

    fn player(b: u8) -> PlayerId {
        PlayerId::from_bytes([b; 20])
    }

    fn winners() -> Winners {
        Winners {
            winners: [player(1), player(2), player(3)],
            scores: [100, 90, 80],
        }
    }

    fn worker() -> (
        ReconciliationWorker<MemoryStore, InMemoryLedger>,
        Arc<MemoryStore>,
        Arc<InMemoryLedger>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        (
            ReconciliationWorker::new(store.clone(), ledger.clone(), WorkerConfig::default()),
            store,
            ledger,
        )
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let (worker, _, ledger) = worker();
        let report = worker.run_once().await.unwrap();
        assert!(report.is_idle());
        assert!(report.is_clean());
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_on_empty_day_is_noop() {
        let (worker, store, ledger) = worker();
        let commit = PendingCommit::checkpoint(day());
        store.enqueue_commit(&commit).await.unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.items[0].outcome, ItemOutcome::NoOp);
        assert!(ledger.calls().is_empty());

        let done = store.get_commit(&commit.id).await.unwrap().unwrap();
        assert_eq!(done.status, CommitStatus::Done);
        assert!(store.commit_logs_for_day(day(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_anchors_digest() {
        let (worker, store, ledger) = worker();
        for (b, score) in [(1, 100), (2, 90)] {
            store
                .upsert_best_score(&ScoreSubmission::new(player(b), day(), score))
                .await
                .unwrap();
        }
        store.enqueue_commit(&PendingCommit::checkpoint(day())).await.unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.anchored(), 1);

        let expected = leaderboard_digest(&store.best_scores_for_day(day()).await.unwrap()).unwrap();
        assert_eq!(ledger.checkpoints(day()), vec![expected]);

        let logs = store
            .commit_logs_for_day(day(), Some(CommitKind::Checkpoint))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].payload,
            CommitLogPayload::Checkpoint {
                digest: expected,
                entries: 2
            }
        );
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_retried() {
        let (worker, store, ledger) = worker();
        store
            .upsert_best_score(&ScoreSubmission::new(player(1), day(), 5))
            .await
            .unwrap();
        let first = PendingCommit::checkpoint(day());
        let mut second = PendingCommit::checkpoint(day());
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.enqueue_commit(&first).await.unwrap();
        store.enqueue_commit(&second).await.unwrap();

        ledger.fail_next_calls(1);
        let report = worker.run_once().await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.failed(), 1);
        assert_eq!(report.anchored(), 1);

        let failed = store.get_commit(&first.id).await.unwrap().unwrap();
        assert_eq!(failed.status, CommitStatus::Error);
        assert!(failed.error_message.unwrap().contains("injected"));
        // 失败的 checkpoint 不写审计日志
        assert_eq!(store.commit_logs_for_day(day(), None).await.unwrap().len(), 1);

        let retry = worker.run_once().await.unwrap();
        assert!(retry.is_clean());
        assert_eq!(retry.items.len(), 1);
        let done = store.get_commit(&first.id).await.unwrap().unwrap();
        assert_eq!(done.status, CommitStatus::Done);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn test_reverting_day_does_not_starve_other_days() {
        let (worker, store, ledger) = worker();
        let closed = day();
        let open = day().next().unwrap();
        for day_id in [closed, open] {
            store
                .upsert_best_score(&ScoreSubmission::new(player(1), day_id, 10))
                .await
                .unwrap();
        }
        // 已 finalize 的一天，checkpoint 写入都会 revert
        ledger.force_finalized(closed, &winners());

        let base = Utc::now() - chrono::Duration::minutes(5);
        for i in 0..10 {
            let mut commit = PendingCommit::checkpoint(closed);
            commit.created_at = base + chrono::Duration::seconds(i);
            store.enqueue_commit(&commit).await.unwrap();
        }
        let fresh = PendingCommit::checkpoint(open);
        store.enqueue_commit(&fresh).await.unwrap();

        let first = worker.run_once().await.unwrap();
        assert_eq!(first.failed(), 10);

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.items[0].commit_id, fresh.id);
        assert_eq!(second.anchored(), 1);
        assert_eq!(ledger.day_info(open).checkpoint_count, 1);

        let done = store.get_commit(&fresh.id).await.unwrap().unwrap();
        assert_eq!(done.status, CommitStatus::Done);
    }

    #[tokio::test]
    async fn test_finalize_writes_once() {
        let (worker, store, ledger) = worker();
        let commit = PendingCommit::finalize(day(), winners());
        store.enqueue_commit(&commit).await.unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.anchored(), 1);
        assert_eq!(ledger.finalize_calls(day()), 1);
        assert!(ledger.day_info(day()).finalized);

        let again = worker.run_once().await.unwrap();
        assert!(again.is_idle());
        assert_eq!(ledger.finalize_calls(day()), 1);
    }

    #[tokio::test]
    async fn test_finalize_backstop_on_ledger_latch() {
        let (worker, store, ledger) = worker();
        let commit = PendingCommit::finalize(day(), winners());
        store.enqueue_commit(&commit).await.unwrap();
        ledger.force_finalized(day(), &winners());

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.items[0].outcome, ItemOutcome::Reconciled);
        assert_eq!(ledger.finalize_calls(day()), 0);

        let done = store.get_commit(&commit.id).await.unwrap().unwrap();
        assert_eq!(done.status, CommitStatus::Done);
    }

    #[tokio::test]
    async fn test_cancelled_budget_stops_before_work() {
        let (worker, store, ledger) = worker();
        store.enqueue_commit(&PendingCommit::finalize(day(), winners())).await.unwrap();

        let budget = RunBudget::with_deadline(Duration::from_secs(60));
        budget.cancel_token().cancel();

        let report = worker.run(&budget).await.unwrap();
        assert_eq!(report.stopped_early.as_deref(), Some("cancelled"));
        assert!(!report.is_clean());
        assert!(ledger.calls().is_empty());
        assert_eq!(store.get_stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_one_run() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let config = WorkerConfig {
            checkpoint_batch_size: 2,
            ..WorkerConfig::default()
        };
        let worker = ReconciliationWorker::new(store.clone(), ledger, config);
        for _ in 0..5 {
            store.enqueue_commit(&PendingCommit::checkpoint(day())).await.unwrap();
        }

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.items.len(), 2);
        assert_eq!(store.get_stats().await.unwrap().pending, 3);
    }
}
