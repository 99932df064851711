//! Sled 持久化存储实现
//!
//! 提供基于 Sled 嵌入式数据库的持久化存储实现。
//!
//! 条件写入依赖 sled 的 compare_and_swap：读取当前值、计算新值、
//! 仅当当前值未被其他写者修改时替换，否则重新计算。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{backlog_order, fifo_order, transition_error, EnqueueOutcome, LeaderboardStore, ProjectionUpdate, QueueStats};
use crate::error::{AnchorError, AnchorResult};
use podium_core::{
    BestScore, CommitId, CommitKind, CommitLog, DayId, PendingCommit, PlayerId, ScoreSubmission,
};

/// Tree 名称常量
const SUBMISSIONS_TREE: &str = "submissions";
const BEST_SCORES_TREE: &str = "best_scores";
const COMMITS_TREE: &str = "pending_commits";
const COMMIT_LOGS_TREE: &str = "commit_logs";
const OPEN_QUEUE_TREE: &str = "open_queue";
const FINALIZE_INDEX_TREE: &str = "finalize_index";

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// sled 在目录文件锁被其他句柄持有时返回的 IO 错误
fn is_lock_contention(e: &sled::Error) -> bool {
    matches!(e, sled::Error::Io(io) if io.to_string().contains("could not acquire lock"))
}

/// Sled 持久化存储
///
/// `open_queue` 索引收录所有未完成的提交，键为 kind + created_at + id，
/// 按键序扫描即为 FIFO。提交完成后移除索引项。
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    submissions: sled::Tree,
    best_scores: sled::Tree,
    commits: sled::Tree,
    commit_logs: sled::Tree,
    open_queue: sled::Tree,
    finalize_index: sled::Tree,
}

impl SledStore {
    /// 打开或创建 Sled 数据库
    pub fn open<P: AsRef<Path>>(path: P) -> AnchorResult<Self> {
        let db = sled::open(path)
            .map_err(|e| AnchorError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    /// 打开数据库，目录锁仍被占用时（上一个实例正在退出）在 `wait` 内重试
    pub async fn open_waiting<P: AsRef<Path>>(path: P, wait: Duration) -> AnchorResult<Self> {
        let path = path.as_ref();
        let deadline = Instant::now() + wait;
        loop {
            match sled::open(path) {
                Ok(db) => return Self::from_db(db),
                Err(e) if is_lock_contention(&e) && Instant::now() < deadline => {
                    debug!("sled db {} is still locked, retrying", path.display());
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(AnchorError::Storage(format!("Failed to open sled db: {}", e)))
                }
            }
        }
    }

    /// 基于已打开的数据库构建存储
    pub fn from_db(db: sled::Db) -> AnchorResult<Self> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| AnchorError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };

        Ok(Self {
            submissions: open(SUBMISSIONS_TREE)?,
            best_scores: open(BEST_SCORES_TREE)?,
            commits: open(COMMITS_TREE)?,
            commit_logs: open(COMMIT_LOGS_TREE)?,
            open_queue: open(OPEN_QUEUE_TREE)?,
            finalize_index: open(FINALIZE_INDEX_TREE)?,
            db,
        })
    }

    /// 刷新到磁盘
    pub async fn flush(&self) -> AnchorResult<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AnchorError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    // ==================== 辅助方法 ====================

    fn serialize<T: Serialize>(value: &T) -> AnchorResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| AnchorError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> AnchorResult<T> {
        serde_json::from_slice(bytes).map_err(|e| AnchorError::Serialization(e.to_string()))
    }

    fn day_key(day_id: DayId) -> [u8; 4] {
        day_id.as_u32().to_be_bytes()
    }

    fn player_key(day_id: DayId, player: &PlayerId) -> Vec<u8> {
        let mut key = Self::day_key(day_id).to_vec();
        key.extend_from_slice(&player.to_bytes());
        key
    }

    fn commit_key(id: &CommitId) -> [u8; 16] {
        *id.0.as_bytes()
    }

    fn time_key(at: DateTime<Utc>) -> [u8; 8] {
        (at.timestamp_micros().max(0) as u64).to_be_bytes()
    }

    fn kind_tag(kind: CommitKind) -> u8 {
        match kind {
            CommitKind::Checkpoint => 0,
            CommitKind::Finalize => 1,
        }
    }

    fn queue_key(commit: &PendingCommit) -> Vec<u8> {
        let mut key = vec![Self::kind_tag(commit.kind())];
        key.extend_from_slice(&Self::time_key(commit.created_at));
        key.extend_from_slice(&Self::commit_key(&commit.id));
        key
    }

    fn load_commit(&self, key: &[u8]) -> AnchorResult<Option<PendingCommit>> {
        match self
            .commits
            .get(key)
            .map_err(|e| AnchorError::Storage(format!("Failed to get commit: {}", e)))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 对单个提交做 compare-and-swap 更新
    ///
    /// `apply` 返回 false 表示不修改，结果为 None。
    fn update_commit<F>(&self, id: &CommitId, mut apply: F) -> AnchorResult<Option<PendingCommit>>
    where
        F: FnMut(&mut PendingCommit) -> AnchorResult<bool>,
    {
        let key = Self::commit_key(id);
        loop {
            let current = self
                .commits
                .get(key)
                .map_err(|e| AnchorError::Storage(format!("Failed to get commit: {}", e)))?
                .ok_or_else(|| AnchorError::CommitNotFound(id.to_string()))?;

            let mut commit: PendingCommit = Self::deserialize(&current)?;
            if !apply(&mut commit)? {
                return Ok(None);
            }

            let value = Self::serialize(&commit)?;
            let swapped = self
                .commits
                .compare_and_swap(key, Some(&current), Some(value))
                .map_err(|e| AnchorError::Storage(format!("Failed to update commit: {}", e)))?;
            if swapped.is_ok() {
                return Ok(Some(commit));
            }
            // 并发写入，重新读取后再判断
        }
    }

    fn transition<F>(&self, id: &CommitId, mut apply: F) -> AnchorResult<PendingCommit>
    where
        F: FnMut(&mut PendingCommit) -> podium_core::CoreResult<()>,
    {
        self.update_commit(id, |commit| {
            apply(commit).map_err(|e| transition_error(id, e))?;
            Ok(true)
        })?
        .ok_or_else(|| AnchorError::CommitNotFound(id.to_string()))
    }

    fn enqueue_finalize(&self, commit: &PendingCommit, value: &[u8]) -> AnchorResult<EnqueueOutcome> {
        let day_key = Self::day_key(commit.day_id);
        let commit_key = Self::commit_key(&commit.id);
        let queue_key = Self::queue_key(commit);

        let result = (&self.commits, &self.open_queue, &self.finalize_index).transaction(
            |(commits, open_queue, finalize_index)| {
                if let Some(existing) = finalize_index.get(day_key)? {
                    return Err(ConflictableTransactionError::Abort(existing.to_vec()));
                }
                finalize_index.insert(&day_key[..], &commit_key[..])?;
                commits.insert(&commit_key[..], value)?;
                open_queue.insert(queue_key.as_slice(), Vec::<u8>::new())?;
                Ok(())
            },
        );

        match result {
            Ok(()) => Ok(EnqueueOutcome::Enqueued),
            Err(TransactionError::Abort(existing_key)) => {
                let existing = self.load_commit(&existing_key)?.ok_or_else(|| {
                    AnchorError::Storage(format!(
                        "finalize index for day {} points at a missing commit",
                        commit.day_id
                    ))
                })?;
                Ok(EnqueueOutcome::Duplicate(existing))
            }
            Err(TransactionError::Storage(e)) => {
                Err(AnchorError::Storage(format!("Failed to enqueue finalize: {}", e)))
            }
        }
    }
}

#[async_trait]
impl LeaderboardStore for SledStore {
    // ==================== 成绩 ====================

    async fn insert_submission(&self, submission: &ScoreSubmission) -> AnchorResult<()> {
        let mut key = Self::player_key(submission.day_id, &submission.player);
        key.extend_from_slice(submission.id.as_bytes());
        let value = Self::serialize(submission)?;

        self.submissions
            .insert(key, value)
            .map_err(|e| AnchorError::Storage(format!("Failed to save submission: {}", e)))?;
        Ok(())
    }

    async fn list_submissions(
        &self,
        day_id: DayId,
        player: &PlayerId,
    ) -> AnchorResult<Vec<ScoreSubmission>> {
        let mut submissions = Vec::new();
        for item in self.submissions.scan_prefix(Self::player_key(day_id, player)) {
            let (_, value) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate submissions: {}", e)))?;
            submissions.push(Self::deserialize::<ScoreSubmission>(&value)?);
        }
        submissions.sort_by_key(|s| s.submitted_at);
        Ok(submissions)
    }

    async fn upsert_best_score(&self, submission: &ScoreSubmission) -> AnchorResult<ProjectionUpdate> {
        let key = Self::player_key(submission.day_id, &submission.player);
        loop {
            let current = self
                .best_scores
                .get(&key)
                .map_err(|e| AnchorError::Storage(format!("Failed to get best score: {}", e)))?;
            let existing: Option<BestScore> = match &current {
                Some(bytes) => Some(Self::deserialize(bytes)?),
                None => None,
            };

            let update = match existing {
                None => ProjectionUpdate::Inserted(BestScore::from_submission(submission)),
                Some(row) if BestScore::is_improved_by(Some(&row), submission) => {
                    ProjectionUpdate::Raised {
                        previous: row.best_score,
                        current: BestScore::from_submission(submission),
                    }
                }
                Some(row) => return Ok(ProjectionUpdate::Unchanged(row)),
            };

            let value = Self::serialize(update.best())?;
            let swapped = self
                .best_scores
                .compare_and_swap(&key, current.as_ref(), Some(value))
                .map_err(|e| AnchorError::Storage(format!("Failed to upsert best score: {}", e)))?;
            if swapped.is_ok() {
                return Ok(update);
            }
        }
    }

    async fn get_best_score(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<Option<BestScore>> {
        let key = Self::player_key(day_id, player);
        match self
            .best_scores
            .get(key)
            .map_err(|e| AnchorError::Storage(format!("Failed to get best score: {}", e)))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn best_scores_for_day(&self, day_id: DayId) -> AnchorResult<Vec<BestScore>> {
        let mut rows = Vec::new();
        for item in self.best_scores.scan_prefix(Self::day_key(day_id)) {
            let (_, value) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate best scores: {}", e)))?;
            rows.push(Self::deserialize(&value)?);
        }
        Ok(rows)
    }

    // ==================== 提交队列 ====================

    async fn enqueue_commit(&self, commit: &PendingCommit) -> AnchorResult<EnqueueOutcome> {
        let value = Self::serialize(commit)?;
        if commit.kind() == CommitKind::Finalize {
            return self.enqueue_finalize(commit, &value);
        }

        let commit_key = Self::commit_key(&commit.id);
        let queue_key = Self::queue_key(commit);
        (&self.commits, &self.open_queue)
            .transaction(|(commits, open_queue)| {
                commits.insert(&commit_key[..], value.as_slice())?;
                open_queue.insert(queue_key.as_slice(), Vec::<u8>::new())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| AnchorError::Storage(format!("Failed to enqueue commit: {:?}", e)))?;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn get_commit(&self, id: &CommitId) -> AnchorResult<Option<PendingCommit>> {
        self.load_commit(&Self::commit_key(id))
    }

    async fn list_backlog(&self, kind: CommitKind, limit: usize) -> AnchorResult<Vec<PendingCommit>> {
        // open_queue 只含未完成的提交，error 行的位置取决于最近认领时间，需整体排序
        let mut backlog = Vec::new();
        for item in self.open_queue.scan_prefix([Self::kind_tag(kind)]) {
            let (queue_key, _) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate queue: {}", e)))?;
            let Some(commit) = self.load_commit(&queue_key[9..])? else {
                continue;
            };
            if commit.status.is_backlog() {
                backlog.push(commit);
            }
        }
        backlog.sort_by(backlog_order);
        backlog.truncate(limit);
        Ok(backlog)
    }

    async fn claim_commit(
        &self,
        id: &CommitId,
        now: DateTime<Utc>,
    ) -> AnchorResult<Option<PendingCommit>> {
        self.update_commit(id, |commit| {
            if !commit.status.is_backlog() {
                return Ok(false);
            }
            commit.claim(now).map_err(|e| transition_error(id, e))?;
            Ok(true)
        })
    }

    async fn complete_commit(&self, id: &CommitId, now: DateTime<Utc>) -> AnchorResult<PendingCommit> {
        let commit = self.transition(id, |c| c.complete(now))?;
        self.open_queue
            .remove(Self::queue_key(&commit))
            .map_err(|e| AnchorError::Storage(format!("Failed to update queue index: {}", e)))?;
        Ok(commit)
    }

    async fn fail_commit(&self, id: &CommitId, reason: &str) -> AnchorResult<PendingCommit> {
        self.transition(id, |c| c.fail(reason))
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> AnchorResult<usize> {
        let mut released = 0;
        for item in self.open_queue.iter() {
            let (queue_key, _) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate queue: {}", e)))?;
            let Some(commit) = self.load_commit(&queue_key[9..])? else {
                continue;
            };
            if !commit.is_stale_claim(cutoff) {
                continue;
            }

            let id = commit.id;
            let updated = self.update_commit(&id, |c| {
                if !c.is_stale_claim(cutoff) {
                    return Ok(false);
                }
                c.fail("claim lease expired").map_err(|e| transition_error(&id, e))?;
                Ok(true)
            })?;
            if updated.is_some() {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn finalize_commit_for_day(&self, day_id: DayId) -> AnchorResult<Option<PendingCommit>> {
        match self
            .finalize_index
            .get(Self::day_key(day_id))
            .map_err(|e| AnchorError::Storage(format!("Failed to get finalize index: {}", e)))?
        {
            Some(commit_key) => self.load_commit(&commit_key),
            None => Ok(None),
        }
    }

    async fn list_commits(&self, day_id: Option<DayId>) -> AnchorResult<Vec<PendingCommit>> {
        let mut commits = Vec::new();
        for item in self.commits.iter() {
            let (_, value) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate commits: {}", e)))?;
            let commit: PendingCommit = Self::deserialize(&value)?;
            if day_id.map_or(true, |d| commit.day_id == d) {
                commits.push(commit);
            }
        }
        commits.sort_by(fifo_order);
        Ok(commits)
    }

    // ==================== 审计日志 ====================

    async fn append_commit_log(&self, log: &CommitLog) -> AnchorResult<()> {
        let mut key = Self::day_key(log.day_id).to_vec();
        key.extend_from_slice(&Self::time_key(log.created_at));
        key.extend_from_slice(log.id.as_bytes());
        let value = Self::serialize(log)?;

        self.commit_logs
            .insert(key, value)
            .map_err(|e| AnchorError::Storage(format!("Failed to save commit log: {}", e)))?;
        Ok(())
    }

    async fn commit_logs_for_day(
        &self,
        day_id: DayId,
        kind: Option<CommitKind>,
    ) -> AnchorResult<Vec<CommitLog>> {
        let mut logs = Vec::new();
        for item in self.commit_logs.scan_prefix(Self::day_key(day_id)) {
            let (_, value) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate commit logs: {}", e)))?;
            let log: CommitLog = Self::deserialize(&value)?;
            if kind.map_or(true, |k| log.kind() == k) {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    // ==================== 统计 ====================

    async fn get_stats(&self) -> AnchorResult<QueueStats> {
        let mut stats = QueueStats {
            submissions: self.submissions.len() as u64,
            best_scores: self.best_scores.len() as u64,
            commit_logs: self.commit_logs.len() as u64,
            ..Default::default()
        };
        for item in self.commits.iter() {
            let (_, value) = item
                .map_err(|e| AnchorError::Storage(format!("Failed to iterate commits: {}", e)))?;
            stats.count(&Self::deserialize::<PendingCommit>(&value)?);
        }
        Ok(stats)
    }
}
