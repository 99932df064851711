//! 内存存储实现
//!
//! 提供基于内存的存储实现，主要用于测试和开发。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{backlog_order, fifo_order, transition_error, EnqueueOutcome, LeaderboardStore, ProjectionUpdate, QueueStats};
use crate::error::{AnchorError, AnchorResult};
use podium_core::{
    BestScore, CommitId, CommitKind, CommitLog, DayId, PendingCommit, PlayerId, ScoreSubmission,
};

/// 内存存储
///
/// 线程安全的内存存储实现，使用 RwLock 保护共享数据。
/// 条件写入在同一把写锁内完成检查与修改。
#[derive(Debug)]
pub struct MemoryStore {
    submissions: Arc<RwLock<Vec<ScoreSubmission>>>,
    best_scores: Arc<RwLock<HashMap<(DayId, PlayerId), BestScore>>>,
    commits: Arc<RwLock<HashMap<CommitId, PendingCommit>>>,
    commit_logs: Arc<RwLock<Vec<CommitLog>>>,
    // 故障注入
    reject_enqueue: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            submissions: Arc::new(RwLock::new(Vec::new())),
            best_scores: Arc::new(RwLock::new(HashMap::new())),
            commits: Arc::new(RwLock::new(HashMap::new())),
            commit_logs: Arc::new(RwLock::new(Vec::new())),
            reject_enqueue: AtomicBool::new(false),
        }
    }

    /// 使后续入队失败，模拟队列不可用
    pub fn set_reject_enqueue(&self, reject: bool) {
        self.reject_enqueue.store(reject, Ordering::SeqCst);
    }

    async fn transition<F>(&self, id: &CommitId, apply: F) -> AnchorResult<PendingCommit>
    where
        F: FnOnce(&mut PendingCommit) -> podium_core::CoreResult<()>,
    {
        let mut commits = self.commits.write().await;
        let commit = commits
            .get_mut(id)
            .ok_or_else(|| AnchorError::CommitNotFound(id.to_string()))?;
        let mut next = commit.clone();
        apply(&mut next).map_err(|e| transition_error(id, e))?;
        *commit = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    // ==================== 成绩 ====================

    async fn insert_submission(&self, submission: &ScoreSubmission) -> AnchorResult<()> {
        self.submissions.write().await.push(submission.clone());
        Ok(())
    }

    async fn list_submissions(
        &self,
        day_id: DayId,
        player: &PlayerId,
    ) -> AnchorResult<Vec<ScoreSubmission>> {
        let submissions = self.submissions.read().await;
        Ok(submissions
            .iter()
            .filter(|s| s.day_id == day_id && &s.player == player)
            .cloned()
            .collect())
    }

    async fn upsert_best_score(&self, submission: &ScoreSubmission) -> AnchorResult<ProjectionUpdate> {
        let mut best_scores = self.best_scores.write().await;
        let key = (submission.day_id, submission.player.clone());

        let update = match best_scores.get(&key) {
            None => ProjectionUpdate::Inserted(BestScore::from_submission(submission)),
            Some(existing) if BestScore::is_improved_by(Some(existing), submission) => {
                ProjectionUpdate::Raised {
                    previous: existing.best_score,
                    current: BestScore::from_submission(submission),
                }
            }
            Some(existing) => return Ok(ProjectionUpdate::Unchanged(existing.clone())),
        };

        best_scores.insert(key, update.best().clone());
        Ok(update)
    }

    async fn get_best_score(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<Option<BestScore>> {
        let best_scores = self.best_scores.read().await;
        Ok(best_scores.get(&(day_id, player.clone())).cloned())
    }

    async fn best_scores_for_day(&self, day_id: DayId) -> AnchorResult<Vec<BestScore>> {
        let best_scores = self.best_scores.read().await;
        Ok(best_scores
            .values()
            .filter(|b| b.day_id == day_id)
            .cloned()
            .collect())
    }

    // ==================== 提交队列 ====================

    async fn enqueue_commit(&self, commit: &PendingCommit) -> AnchorResult<EnqueueOutcome> {
        if self.reject_enqueue.load(Ordering::SeqCst) {
            return Err(AnchorError::Storage("commit queue unavailable".to_string()));
        }

        let mut commits = self.commits.write().await;
        if commit.kind() == CommitKind::Finalize {
            let existing = commits
                .values()
                .find(|c| c.day_id == commit.day_id && c.kind() == CommitKind::Finalize);
            if let Some(existing) = existing {
                return Ok(EnqueueOutcome::Duplicate(existing.clone()));
            }
        }

        commits.insert(commit.id, commit.clone());
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn get_commit(&self, id: &CommitId) -> AnchorResult<Option<PendingCommit>> {
        let commits = self.commits.read().await;
        Ok(commits.get(id).cloned())
    }

    async fn list_backlog(&self, kind: CommitKind, limit: usize) -> AnchorResult<Vec<PendingCommit>> {
        let commits = self.commits.read().await;
        let mut backlog: Vec<PendingCommit> = commits
            .values()
            .filter(|c| c.kind() == kind && c.status.is_backlog())
            .cloned()
            .collect();
        backlog.sort_by(backlog_order);
        backlog.truncate(limit);
        Ok(backlog)
    }

    async fn claim_commit(
        &self,
        id: &CommitId,
        now: DateTime<Utc>,
    ) -> AnchorResult<Option<PendingCommit>> {
        let mut commits = self.commits.write().await;
        let commit = commits
            .get_mut(id)
            .ok_or_else(|| AnchorError::CommitNotFound(id.to_string()))?;

        if !commit.status.is_backlog() {
            return Ok(None);
        }
        commit.claim(now).map_err(|e| transition_error(id, e))?;
        Ok(Some(commit.clone()))
    }

    async fn complete_commit(&self, id: &CommitId, now: DateTime<Utc>) -> AnchorResult<PendingCommit> {
        self.transition(id, |c| c.complete(now)).await
    }

    async fn fail_commit(&self, id: &CommitId, reason: &str) -> AnchorResult<PendingCommit> {
        self.transition(id, |c| c.fail(reason)).await
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> AnchorResult<usize> {
        let mut commits = self.commits.write().await;
        let mut released = 0;
        for commit in commits.values_mut().filter(|c| c.is_stale_claim(cutoff)) {
            commit
                .fail("claim lease expired")
                .map_err(|e| transition_error(&commit.id, e))?;
            released += 1;
        }
        Ok(released)
    }

    async fn finalize_commit_for_day(&self, day_id: DayId) -> AnchorResult<Option<PendingCommit>> {
        let commits = self.commits.read().await;
        Ok(commits
            .values()
            .find(|c| c.day_id == day_id && c.kind() == CommitKind::Finalize)
            .cloned())
    }

    async fn list_commits(&self, day_id: Option<DayId>) -> AnchorResult<Vec<PendingCommit>> {
        let commits = self.commits.read().await;
        let mut result: Vec<PendingCommit> = commits
            .values()
            .filter(|c| day_id.map_or(true, |d| c.day_id == d))
            .cloned()
            .collect();
        result.sort_by(fifo_order);
        Ok(result)
    }

    // ==================== 审计日志 ====================

    async fn append_commit_log(&self, log: &CommitLog) -> AnchorResult<()> {
        self.commit_logs.write().await.push(log.clone());
        Ok(())
    }

    async fn commit_logs_for_day(
        &self,
        day_id: DayId,
        kind: Option<CommitKind>,
    ) -> AnchorResult<Vec<CommitLog>> {
        let logs = self.commit_logs.read().await;
        Ok(logs
            .iter()
            .filter(|l| l.day_id == day_id && kind.map_or(true, |k| l.kind() == k))
            .cloned()
            .collect())
    }

    // ==================== 统计 ====================

    async fn get_stats(&self) -> AnchorResult<QueueStats> {
        let mut stats = QueueStats {
            submissions: self.submissions.read().await.len() as u64,
            best_scores: self.best_scores.read().await.len() as u64,
            commit_logs: self.commit_logs.read().await.len() as u64,
            ..Default::default()
        };
        for commit in self.commits.read().await.values() {
            stats.count(commit);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podium_core::{CommitStatus, Winners};

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

    #[tokio::test]
    async fn test_best_score_only_rises() {
        let store = MemoryStore::new();

        let first = store
            .upsert_best_score(&ScoreSubmission::new(player(1), day(), 10))
            .await
            .unwrap();
        assert!(matches!(first, ProjectionUpdate::Inserted(_)));

        let raised = store
            .upsert_best_score(&ScoreSubmission::new(player(1), day(), 30))
            .await
            .unwrap();
        assert_eq!(
            raised,
            ProjectionUpdate::Raised {
                previous: 10,
                current: raised.best().clone()
            }
        );

        let lower = store
            .upsert_best_score(&ScoreSubmission::new(player(1), day(), 20))
            .await
            .unwrap();
        assert!(!lower.changed());

        let best = store.get_best_score(day(), &player(1)).await.unwrap().unwrap();
        assert_eq!(best.best_score, 30);
    }

    #[tokio::test]
    async fn test_equal_score_keeps_existing_row() {
        let store = MemoryStore::new();
        let first = ScoreSubmission::new(player(1), day(), 50);
        store.upsert_best_score(&first).await.unwrap();

        let again = store
            .upsert_best_score(&ScoreSubmission::new(player(1), day(), 50))
            .await
            .unwrap();
        assert!(!again.changed());
        assert_eq!(again.best().updated_at, first.submitted_at);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_maximum() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for score in [5u64, 40, 12, 33, 7, 39] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_best_score(&ScoreSubmission::new(player(9), day(), score))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let best = store.get_best_score(day(), &player(9)).await.unwrap().unwrap();
        assert_eq!(best.best_score, 40);
    }

    #[tokio::test]
    async fn test_backlog_is_fifo_per_kind() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut commit = PendingCommit::checkpoint(day());
            commit.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.enqueue_commit(&commit).await.unwrap();
            ids.push(commit.id);
        }
        store
            .enqueue_commit(&PendingCommit::finalize(day(), winners()))
            .await
            .unwrap();

        let backlog = store.list_backlog(CommitKind::Checkpoint, 10).await.unwrap();
        assert_eq!(backlog.iter().map(|c| c.id).collect::<Vec<_>>(), ids);

        let limited = store.list_backlog(CommitKind::Checkpoint, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_failed_rows_rotate_behind_pending() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut commit = PendingCommit::checkpoint(day());
            commit.created_at = base + chrono::Duration::seconds(i);
            store.enqueue_commit(&commit).await.unwrap();
            ids.push(commit.id);
        }

        // 2 先失败，0 后失败
        for (id, at) in [(ids[2], 10), (ids[0], 20)] {
            store
                .claim_commit(&id, base + chrono::Duration::seconds(at))
                .await
                .unwrap();
            store.fail_commit(&id, "reverted").await.unwrap();
        }

        let backlog = store.list_backlog(CommitKind::Checkpoint, 10).await.unwrap();
        assert_eq!(
            backlog.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2], ids[0]]
        );
        let limited = store.list_backlog(CommitKind::Checkpoint, 1).await.unwrap();
        assert_eq!(limited[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let commit = PendingCommit::checkpoint(day());
        store.enqueue_commit(&commit).await.unwrap();

        let first = store.claim_commit(&commit.id, Utc::now()).await.unwrap();
        assert!(first.is_some());
        let second = store.claim_commit(&commit.id, Utc::now()).await.unwrap();
        assert!(second.is_none());

        let backlog = store.list_backlog(CommitKind::Checkpoint, 10).await.unwrap();
        assert!(backlog.is_empty());
    }

    #[tokio::test]
    async fn test_error_rows_are_reclaimed() {
        let store = MemoryStore::new();
        let commit = PendingCommit::checkpoint(day());
        store.enqueue_commit(&commit).await.unwrap();

        store.claim_commit(&commit.id, Utc::now()).await.unwrap();
        let failed = store.fail_commit(&commit.id, "rpc down").await.unwrap();
        assert_eq!(failed.status, CommitStatus::Error);

        let backlog = store.list_backlog(CommitKind::Checkpoint, 10).await.unwrap();
        assert_eq!(backlog.len(), 1);

        let reclaimed = store
            .claim_commit(&commit.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.attempts, 2);
        let done = store.complete_commit(&commit.id, Utc::now()).await.unwrap();
        assert_eq!(done.status, CommitStatus::Done);
        assert!(store.claim_commit(&commit.id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_claim() {
        let store = MemoryStore::new();
        let commit = PendingCommit::checkpoint(day());
        store.enqueue_commit(&commit).await.unwrap();

        let err = store.complete_commit(&commit.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AnchorError::Storage(_)));

        let missing = store.fail_commit(&CommitId::generate(), "x").await.unwrap_err();
        assert!(matches!(missing, AnchorError::CommitNotFound(_)));
    }

    #[tokio::test]
    async fn test_single_finalize_per_day() {
        let store = MemoryStore::new();
        let first = PendingCommit::finalize(day(), winners());
        assert_eq!(store.enqueue_commit(&first).await.unwrap(), EnqueueOutcome::Enqueued);

        let second = PendingCommit::finalize(day(), winners());
        match store.enqueue_commit(&second).await.unwrap() {
            EnqueueOutcome::Duplicate(existing) => assert_eq!(existing.id, first.id),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let other_day = PendingCommit::finalize(day().next().unwrap(), winners());
        assert_eq!(store.enqueue_commit(&other_day).await.unwrap(), EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let store = MemoryStore::new();
        let stale = PendingCommit::checkpoint(day());
        let fresh = PendingCommit::checkpoint(day());
        store.enqueue_commit(&stale).await.unwrap();
        store.enqueue_commit(&fresh).await.unwrap();

        let now = Utc::now();
        store
            .claim_commit(&stale.id, now - chrono::Duration::hours(1))
            .await
            .unwrap();
        store.claim_commit(&fresh.id, now).await.unwrap();

        let released = store
            .release_stale_claims(now - chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(released, 1);

        let stale = store.get_commit(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, CommitStatus::Error);
        let fresh = store.get_commit(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, CommitStatus::Processing);
    }

    #[tokio::test]
    async fn test_rejected_enqueue() {
        let store = MemoryStore::new();
        store.set_reject_enqueue(true);
        let err = store
            .enqueue_commit(&PendingCommit::checkpoint(day()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Storage(_)));
        assert_eq!(store.get_stats().await.unwrap().pending, 0);
    }
}
