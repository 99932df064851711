//! Podium 存储层
//!
//! 提供排行榜状态与提交队列的持久化存储接口和实现。
//!
//! # 逻辑表
//!
//! - `submissions`: 原始成绩，只追加
//! - `best_scores`: 每个 (player, day) 的最佳成绩投影，唯一键 player+day
//! - `pending_commits`: 待处理提交队列，按 status+kind+created_at 排序出队
//! - `commit_logs`: 审计日志，只追加，按 day+kind 索引
//!
//! # 设计原则
//!
//! - 最佳成绩更新必须是单次条件写入，不得先读后写
//! - 认领 (pending/error → processing) 必须是原子条件更新，
//!   并发认领同一行时最多一个成功
//! - 每天最多一个 finalize 提交（error 行同样计入，因为它会被重试）

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AnchorError, AnchorResult};
use podium_core::{
    BestScore, CommitId, CommitKind, CommitLog, CommitStatus, CoreError, DayId, PendingCommit,
    PlayerId, ScoreSubmission,
};

/// 最佳成绩投影的更新结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionUpdate {
    /// 首次写入该 (player, day)
    Inserted(BestScore),
    /// 新成绩超过旧值，已替换
    Raised { previous: u64, current: BestScore },
    /// 新成绩未超过旧值，投影保持不变
    Unchanged(BestScore),
}

impl ProjectionUpdate {
    /// 更新后的投影行
    pub fn best(&self) -> &BestScore {
        match self {
            Self::Inserted(best) | Self::Unchanged(best) => best,
            Self::Raised { current, .. } => current,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// 入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 已入队
    Enqueued,
    /// 当天已存在 finalize 提交，未入队
    Duplicate(PendingCommit),
}

/// 排行榜存储接口
///
/// 定义提交队列与成绩投影所需的所有存储操作。
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    // ==================== 成绩 ====================

    /// 追加原始成绩
    async fn insert_submission(&self, submission: &ScoreSubmission) -> AnchorResult<()>;

    /// 列出某玩家某天的原始成绩
    async fn list_submissions(
        &self,
        day_id: DayId,
        player: &PlayerId,
    ) -> AnchorResult<Vec<ScoreSubmission>>;

    /// 条件 upsert 最佳成绩（原子）
    async fn upsert_best_score(&self, submission: &ScoreSubmission) -> AnchorResult<ProjectionUpdate>;

    /// 获取某玩家某天的最佳成绩
    async fn get_best_score(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<Option<BestScore>>;

    /// 获取某天的全部最佳成绩（无序）
    async fn best_scores_for_day(&self, day_id: DayId) -> AnchorResult<Vec<BestScore>>;

    // ==================== 提交队列 ====================

    /// 入队；finalize 提交在当天已有 finalize 行时返回 Duplicate
    async fn enqueue_commit(&self, commit: &PendingCommit) -> AnchorResult<EnqueueOutcome>;

    /// 获取提交
    async fn get_commit(&self, id: &CommitId) -> AnchorResult<Option<PendingCommit>>;

    /// 列出待处理提交，最多 `limit` 条：pending 按创建时间在前，
    /// error 按最近认领时间在后
    async fn list_backlog(&self, kind: CommitKind, limit: usize) -> AnchorResult<Vec<PendingCommit>>;

    /// 原子认领：backlog → processing。返回 None 表示已被其他 worker 认领
    async fn claim_commit(
        &self,
        id: &CommitId,
        now: DateTime<Utc>,
    ) -> AnchorResult<Option<PendingCommit>>;

    /// processing → done
    async fn complete_commit(&self, id: &CommitId, now: DateTime<Utc>) -> AnchorResult<PendingCommit>;

    /// processing → error
    async fn fail_commit(&self, id: &CommitId, reason: &str) -> AnchorResult<PendingCommit>;

    /// 将认领时间早于 `cutoff` 的 processing 行转为 error，返回数量
    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> AnchorResult<usize>;

    /// 当天的 finalize 提交（任意状态）
    async fn finalize_commit_for_day(&self, day_id: DayId) -> AnchorResult<Option<PendingCommit>>;

    /// 列出提交（可按天过滤），按创建时间升序
    async fn list_commits(&self, day_id: Option<DayId>) -> AnchorResult<Vec<PendingCommit>>;

    // ==================== 审计日志 ====================

    /// 追加审计记录
    async fn append_commit_log(&self, log: &CommitLog) -> AnchorResult<()>;

    /// 某天的审计记录（可按类型过滤），按创建时间升序
    async fn commit_logs_for_day(
        &self,
        day_id: DayId,
        kind: Option<CommitKind>,
    ) -> AnchorResult<Vec<CommitLog>>;

    // ==================== 统计 ====================

    /// 获取统计信息
    async fn get_stats(&self) -> AnchorResult<QueueStats>;
}

/// 队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// 原始成绩数
    pub submissions: u64,
    /// 最佳成绩行数
    pub best_scores: u64,
    /// pending 提交数
    pub pending: u64,
    /// processing 提交数
    pub processing: u64,
    /// done 提交数
    pub done: u64,
    /// error 提交数
    pub error: u64,
    /// 审计记录数
    pub commit_logs: u64,
}

impl QueueStats {
    /// worker 可见的积压
    pub fn backlog(&self) -> u64 {
        self.pending + self.error
    }

    pub(crate) fn count(&mut self, commit: &PendingCommit) {
        use podium_core::CommitStatus::*;
        match commit.status {
            Pending => self.pending += 1,
            Processing => self.processing += 1,
            Done => self.done += 1,
            Error => self.error += 1,
        }
    }
}

/// 状态转换失败统一映射为存储错误
pub(crate) fn transition_error(id: &CommitId, e: CoreError) -> AnchorError {
    AnchorError::Storage(format!("commit {}: {}", id, e))
}

/// 提交排序：创建时间升序，id 作为并列键
pub(crate) fn fifo_order(a: &PendingCommit, b: &PendingCommit) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

/// 积压排序：pending 行在前，按创建时间；error 行在后，按最近一次认领时间
///
/// 反复失败的行每次重试后都排到队尾，不会占满后续批次。
pub(crate) fn backlog_order(a: &PendingCommit, b: &PendingCommit) -> std::cmp::Ordering {
    fn position(commit: &PendingCommit) -> (bool, DateTime<Utc>) {
        match commit.status {
            CommitStatus::Error => (true, commit.claimed_at.unwrap_or(commit.created_at)),
            _ => (false, commit.created_at),
        }
    }
    position(a)
        .cmp(&position(b))
        .then_with(|| a.id.cmp(&b.id))
}

// 重新导出
pub use memory::MemoryStore;
pub use self::sled::SledStore;
