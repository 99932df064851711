//! Read Retry Strategy
//!
//! Ledger reads are idempotent and may be retried within a single call.
//! Writes are never retried here: a failed write leaves its commit in `error`
//! and the next worker pass picks it up again.

use std::time::Duration;

/// Retry strategy
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// No retry
    None,
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Exponential backoff
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 250,
            max_delay_ms: 4_000,
            multiplier: 2.0,
        }
    }
}

impl RetryStrategy {
    /// Calculate delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            RetryStrategy::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let delay = (*initial_delay_ms as f64) * multiplier.powi(exponent);
                let delay = delay.min(*max_delay_ms as f64);
                Duration::from_millis(delay as u64)
            }
        }
    }

    /// Total attempts allowed for a read, including the first
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::None => 1,
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(1_000));
        assert_eq!(strategy.delay_for_attempt(10), Duration::from_millis(4_000));
    }

    #[test]
    fn test_fixed_and_none() {
        assert_eq!(
            RetryStrategy::Fixed { delay_ms: 10 }.delay_for_attempt(5),
            Duration::from_millis(10)
        );
        assert_eq!(RetryStrategy::None.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(RetryStrategy::None.max_attempts(), 1);
    }
}
