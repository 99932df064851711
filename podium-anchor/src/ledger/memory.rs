//! In-memory ledger
//!
//! Behaves like the tournament contract for the parts Podium relies on:
//! checkpoints increment a counter until the day is finalized, `finalizeDay`
//! flips the one-way latch and reverts on a second call. Supports fault
//! injection for worker tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::LedgerClient;
use crate::error::{AnchorError, AnchorResult};
use podium_core::{DayId, LeaderboardDigest, LedgerDayInfo, PlayerId, TxRef, Winners};

/// A call observed by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    ReadDayInfo(DayId),
    HasEntered(DayId, PlayerId),
    Checkpoint(DayId, LeaderboardDigest),
    Finalize(DayId, Winners),
}

#[derive(Debug, Default)]
struct LedgerState {
    days: HashMap<DayId, LedgerDayInfo>,
    checkpoints: HashMap<DayId, Vec<LeaderboardDigest>>,
    entries: HashSet<(DayId, PlayerId)>,
    calls: Vec<LedgerCall>,
}

/// In-memory tournament contract
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    tx_counter: AtomicU64,
    failures_left: AtomicU32,
    latency_ms: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add entry fees to a day's pool
    pub fn seed_pool(&self, day_id: DayId, amount: u128) {
        self.state().days.entry(day_id).or_default().total_pool += amount;
    }

    /// Record a paid entry
    pub fn enter(&self, day_id: DayId, player: &PlayerId) {
        self.state().entries.insert((day_id, player.clone()));
    }

    /// Set the latch as if another process had already finalized the day
    pub fn force_finalized(&self, day_id: DayId, winners: &Winners) {
        let mut state = self.state();
        let info = state.days.entry(day_id).or_default();
        info.finalized = true;
        info.winners = winners.winners.clone();
        info.winner_scores = winners.scores;
    }

    /// Fail the next `count` calls with a connection error
    pub fn fail_next_calls(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Delay every call, for timeout tests
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state().calls.clone()
    }

    pub fn day_info(&self, day_id: DayId) -> LedgerDayInfo {
        self.state().days.get(&day_id).cloned().unwrap_or_default()
    }

    /// Digests anchored for a day, in order
    pub fn checkpoints(&self, day_id: DayId) -> Vec<LeaderboardDigest> {
        self.state().checkpoints.get(&day_id).cloned().unwrap_or_default()
    }

    /// Number of `finalizeDay` transactions submitted for a day
    pub fn finalize_calls(&self, day_id: DayId) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, LedgerCall::Finalize(day, _) if *day == day_id))
            .count()
    }

    async fn enter_call(&self, call: LedgerCall) -> AnchorResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.state().calls.push(call);

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AnchorError::RpcConnection("injected ledger failure".to_string()));
        }
        Ok(())
    }

    fn next_tx(&self) -> TxRef {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TxRef::new(format!("0x{:064x}", n))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn read_day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo> {
        self.enter_call(LedgerCall::ReadDayInfo(day_id)).await?;
        Ok(self.day_info(day_id))
    }

    async fn write_checkpoint(&self, day_id: DayId, digest: &LeaderboardDigest) -> AnchorResult<TxRef> {
        self.enter_call(LedgerCall::Checkpoint(day_id, *digest)).await?;

        let mut state = self.state();
        let info = state.days.entry(day_id).or_default();
        if info.finalized {
            return Err(AnchorError::TransactionReverted(format!(
                "day {} already finalized",
                day_id
            )));
        }
        info.checkpoint_count += 1;
        state.checkpoints.entry(day_id).or_default().push(*digest);
        Ok(self.next_tx())
    }

    async fn write_finalize(&self, day_id: DayId, winners: &Winners) -> AnchorResult<TxRef> {
        self.enter_call(LedgerCall::Finalize(day_id, winners.clone())).await?;

        let mut state = self.state();
        let info = state.days.entry(day_id).or_default();
        if info.finalized {
            return Err(AnchorError::TransactionReverted(format!(
                "day {} already finalized",
                day_id
            )));
        }
        if winners.winners.iter().any(PlayerId::is_zero) {
            return Err(AnchorError::TransactionReverted("zero winner address".to_string()));
        }

        info.finalized = true;
        info.winners = winners.winners.clone();
        info.winner_scores = winners.scores;
        Ok(self.next_tx())
    }

    async fn has_entered(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<bool> {
        self.enter_call(LedgerCall::HasEntered(day_id, player.clone())).await?;
        Ok(self.state().entries.contains(&(day_id, player.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DayId {
        DayId::new(20250601).unwrap()
    }

    fn winners() -> Winners {
        Winners {
            winners: [
                PlayerId::from_bytes([1; 20]),
                PlayerId::from_bytes([2; 20]),
                PlayerId::from_bytes([3; 20]),
            ],
            scores: [100, 90, 80],
        }
    }

    #[tokio::test]
    async fn test_finalize_latch() {
        let ledger = InMemoryLedger::new();
        ledger.seed_pool(day(), 500_000_000);

        let tx = ledger.write_finalize(day(), &winners()).await.unwrap();
        assert!(tx.as_str().starts_with("0x"));

        let info = ledger.read_day_info(day()).await.unwrap();
        assert!(info.finalized);
        assert_eq!(info.total_pool, 500_000_000);
        assert_eq!(info.winner_scores, [100, 90, 80]);

        let second = ledger.write_finalize(day(), &winners()).await.unwrap_err();
        assert!(matches!(second, AnchorError::TransactionReverted(_)));
        assert_eq!(ledger.finalize_calls(day()), 2);
    }

    #[tokio::test]
    async fn test_checkpoints_accumulate() {
        let ledger = InMemoryLedger::new();
        ledger.write_checkpoint(day(), &LeaderboardDigest([1; 32])).await.unwrap();
        ledger.write_checkpoint(day(), &LeaderboardDigest([2; 32])).await.unwrap();

        assert_eq!(ledger.day_info(day()).checkpoint_count, 2);
        assert_eq!(ledger.checkpoints(day())[1], LeaderboardDigest([2; 32]));
        assert_eq!(ledger.day_info(day().next().unwrap()).checkpoint_count, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_reverts_after_finalize() {
        let ledger = InMemoryLedger::new();
        ledger.write_finalize(day(), &winners()).await.unwrap();

        let err = ledger
            .write_checkpoint(day(), &LeaderboardDigest([1; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::TransactionReverted(_)));
        assert_eq!(ledger.day_info(day()).checkpoint_count, 0);
    }

    #[tokio::test]
    async fn test_entries_and_injected_failures() {
        let ledger = InMemoryLedger::new();
        let player = PlayerId::from_bytes([7; 20]);
        ledger.enter(day(), &player);

        ledger.fail_next_calls(1);
        assert!(ledger.has_entered(day(), &player).await.is_err());
        assert!(ledger.has_entered(day(), &player).await.unwrap());
        assert!(!ledger
            .has_entered(day(), &PlayerId::from_bytes([8; 20]))
            .await
            .unwrap());
    }
}
