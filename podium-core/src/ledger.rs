//! Ledger-side types
//!
//! Shapes of the data exchanged with the external tournament contract. The
//! contract owns pool accounting and prize distribution; [`PrizeSplit`] only
//! mirrors its arithmetic so operators can preview payouts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::player::PlayerId;
use crate::score::BestScore;

/// Decimal places of the pool token (USDC)
pub const TOKEN_DECIMALS: u32 = 6;

/// Basis-point denominator
pub const BPS_DENOMINATOR: u128 = 10_000;
/// Site fee taken off the top of the pool
pub const SITE_FEE_BPS: u128 = 1_000;
/// Shares of the remaining pool for ranks 1, 2 and 3
pub const PLACE_SHARES_BPS: [u128; 3] = [6_000, 2_500, 1_500];

/// Winners slots committed by a finalize
pub const WINNER_SLOTS: usize = 3;

/// Transaction reference returned by a confirmed ledger write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top three players of a day, in rank order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winners {
    pub winners: [PlayerId; WINNER_SLOTS],
    pub scores: [u64; WINNER_SLOTS],
}

impl Winners {
    /// Take the first three rows of an already ranked leaderboard
    ///
    /// Returns `None` when fewer than three rows are available; a day is never
    /// finalized with padded slots.
    pub fn from_ranked(ranked: &[BestScore]) -> Option<Self> {
        match ranked {
            [first, second, third, ..] => Some(Self {
                winners: [
                    first.player.clone(),
                    second.player.clone(),
                    third.player.clone(),
                ],
                scores: [first.best_score, second.best_score, third.best_score],
            }),
            _ => None,
        }
    }

    /// `(player, score)` pairs in rank order
    pub fn iter(&self) -> impl Iterator<Item = (&PlayerId, u64)> {
        self.winners.iter().zip(self.scores.iter().copied())
    }
}

/// Day state as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDayInfo {
    /// Entry fees collected for the day (token base units)
    pub total_pool: u128,
    /// One-way latch: once set the ledger rejects further finalize calls
    pub finalized: bool,
    /// Number of checkpoints anchored for the day
    pub checkpoint_count: u64,
    /// Winners (zero address when unset)
    pub winners: [PlayerId; WINNER_SLOTS],
    /// Winner scores (zero when unset)
    pub winner_scores: [u64; WINNER_SLOTS],
}

impl Default for LedgerDayInfo {
    fn default() -> Self {
        Self {
            total_pool: 0,
            finalized: false,
            checkpoint_count: 0,
            winners: [PlayerId::zero(), PlayerId::zero(), PlayerId::zero()],
            winner_scores: [0; WINNER_SLOTS],
        }
    }
}

impl LedgerDayInfo {
    /// Expected payout of this day's pool
    pub fn prize_split(&self) -> PrizeSplit {
        PrizeSplit::compute(self.total_pool)
    }
}

/// Distribution of a day's pool, in token base units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeSplit {
    pub total_pool: u128,
    pub site_fee: u128,
    pub first: u128,
    pub second: u128,
    pub third: u128,
}

impl PrizeSplit {
    /// Integer basis-point math, same truncation as the contract
    pub fn compute(total_pool: u128) -> Self {
        let site_fee = bps_of(total_pool, SITE_FEE_BPS);
        let prize_pool = total_pool - site_fee;
        let [first, second, third] = PLACE_SHARES_BPS.map(|share| bps_of(prize_pool, share));

        Self {
            total_pool,
            site_fee,
            first,
            second,
            third,
        }
    }

    /// Prizes for ranks 1..=3
    pub fn prizes(&self) -> [u128; WINNER_SLOTS] {
        [self.first, self.second, self.third]
    }

    /// Truncation dust left undistributed
    pub fn dust(&self) -> u128 {
        self.total_pool - (self.site_fee + self.first + self.second + self.third)
    }
}

/// `floor(amount * bps / BPS_DENOMINATOR)` without overflowing for any `u128` pool
fn bps_of(amount: u128, bps: u128) -> u128 {
    amount / BPS_DENOMINATOR * bps + amount % BPS_DENOMINATOR * bps / BPS_DENOMINATOR
}

/// Render base units with the token's six decimals, e.g. `112.500000`
pub fn format_token_amount(amount: u128) -> String {
    let scale = 10u128.pow(TOKEN_DECIMALS);
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = TOKEN_DECIMALS as usize
    )
}
