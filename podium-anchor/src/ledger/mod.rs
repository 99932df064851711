//! Ledger client
//!
//! The ledger (a tournament contract) owns the authoritative day state: the
//! prize pool, the checkpoint count and the `finalized` latch. Podium only
//! reads it and submits two kinds of writes.
//!
//! - [`JsonRpcLedgerClient`]: talks to a node over JSON-RPC
//! - [`LocalSigner`]: signs owner writes in-process when a key is configured
//! - [`InMemoryLedger`]: contract-shaped fake for tests and dry runs
//! - [`BoundedLedger`]: wraps any client with per-call time bounds and read retries

pub mod abi;
pub mod memory;
pub mod rpc;
pub mod signer;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AnchorError, AnchorResult};
use crate::retry::RetryStrategy;
use podium_core::{DayId, LeaderboardDigest, LedgerDayInfo, PlayerId, TxRef, Winners};

pub use memory::{InMemoryLedger, LedgerCall};
pub use rpc::JsonRpcLedgerClient;
pub use signer::{LegacyTransaction, LocalSigner};

/// Ledger operations used by the pipeline
///
/// Writes return only once the transaction is confirmed, or fail.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current state of a day
    async fn read_day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo>;

    /// Anchor a leaderboard digest
    async fn write_checkpoint(&self, day_id: DayId, digest: &LeaderboardDigest) -> AnchorResult<TxRef>;

    /// Commit winners and trigger prize distribution
    async fn write_finalize(&self, day_id: DayId, winners: &Winners) -> AnchorResult<TxRef>;

    /// Whether `player` paid the entry fee for the day
    async fn has_entered(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<bool>;
}

#[async_trait]
impl<L: LedgerClient + ?Sized> LedgerClient for Arc<L> {
    async fn read_day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo> {
        (**self).read_day_info(day_id).await
    }

    async fn write_checkpoint(&self, day_id: DayId, digest: &LeaderboardDigest) -> AnchorResult<TxRef> {
        (**self).write_checkpoint(day_id, digest).await
    }

    async fn write_finalize(&self, day_id: DayId, winners: &Winners) -> AnchorResult<TxRef> {
        (**self).write_finalize(day_id, winners).await
    }

    async fn has_entered(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<bool> {
        (**self).has_entered(day_id, player).await
    }
}

/// Time-bounded ledger client
///
/// Every call is cut off after its bound so a hung node can never stall a
/// worker invocation. Reads are retried per `read_retry`; writes are not.
pub struct BoundedLedger<L> {
    inner: L,
    read_timeout: Duration,
    write_timeout: Duration,
    read_retry: RetryStrategy,
}

impl<L: LedgerClient> BoundedLedger<L> {
    pub fn new(inner: L, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_retry: RetryStrategy::default(),
        }
    }

    /// Set retry strategy for reads
    pub fn with_read_retry(mut self, strategy: RetryStrategy) -> Self {
        self.read_retry = strategy;
        self
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &'static str, limit: Duration, fut: F) -> AnchorResult<T>
    where
        F: std::future::Future<Output = AnchorResult<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(AnchorError::CallTimeout {
                operation,
                waited_secs: limit.as_secs(),
            }),
        }
    }

    async fn read<T, F, Fut>(&self, operation: &'static str, call: F) -> AnchorResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AnchorResult<T>>,
    {
        let max_attempts = self.read_retry.max_attempts();
        let mut attempt = 1;
        loop {
            match self.bounded(operation, self.read_timeout, call()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && !e.is_client_error() => {
                    let delay = self.read_retry.delay_for_attempt(attempt);
                    warn!(
                        "Ledger read {} failed (attempt {}/{}): {}, retrying in {:?}",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<L: LedgerClient> LedgerClient for BoundedLedger<L> {
    async fn read_day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo> {
        self.read("getDayInfo", || self.inner.read_day_info(day_id)).await
    }

    async fn write_checkpoint(&self, day_id: DayId, digest: &LeaderboardDigest) -> AnchorResult<TxRef> {
        debug!("Bounded checkpoint write for day {}", day_id);
        self.bounded(
            "commitCheckpoint",
            self.write_timeout,
            self.inner.write_checkpoint(day_id, digest),
        )
        .await
    }

    async fn write_finalize(&self, day_id: DayId, winners: &Winners) -> AnchorResult<TxRef> {
        debug!("Bounded finalize write for day {}", day_id);
        self.bounded(
            "finalizeDay",
            self.write_timeout,
            self.inner.write_finalize(day_id, winners),
        )
        .await
    }

    async fn has_entered(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<bool> {
        self.read("hasEntered", || self.inner.has_entered(day_id, player)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DayId {
        DayId::new(20250601).unwrap()
    }

    #[tokio::test]
    async fn test_write_timeout_is_reported() {
        let ledger = InMemoryLedger::new();
        ledger.set_latency(Duration::from_millis(200));
        let bounded = BoundedLedger::new(ledger, Duration::from_secs(1), Duration::from_millis(20));

        let err = bounded
            .write_checkpoint(day(), &LeaderboardDigest([1; 32]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnchorError::CallTimeout {
                operation: "commitCheckpoint",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reads_are_retried() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_calls(2);
        let bounded = BoundedLedger::new(ledger, Duration::from_secs(1), Duration::from_secs(1))
            .with_read_retry(RetryStrategy::Fixed { delay_ms: 1 });

        let info = bounded.read_day_info(day()).await.unwrap();
        assert!(!info.finalized);
        assert_eq!(bounded.inner().calls().len(), 3);
    }

    #[tokio::test]
    async fn test_writes_are_not_retried() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_calls(1);
        let bounded = BoundedLedger::new(ledger, Duration::from_secs(1), Duration::from_secs(1))
            .with_read_retry(RetryStrategy::Fixed { delay_ms: 1 });

        assert!(bounded
            .write_checkpoint(day(), &LeaderboardDigest([1; 32]))
            .await
            .is_err());
        assert_eq!(bounded.inner().day_info(day()).checkpoint_count, 0);
        assert_eq!(bounded.inner().calls().len(), 1);
    }
}
