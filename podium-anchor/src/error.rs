//! Anchor Layer Error Types
//!
//! Error definitions for the commit queue, ledger client and worker.

use podium_core::{CoreError, DayId};
use thiserror::Error;

/// Anchor layer error
#[derive(Error, Debug)]
pub enum AnchorError {
    /// Producer input rejected before anything is written
    #[error("Validation failed: {0}")]
    Validation(#[from] CoreError),

    /// Player has not entered the day's tournament on the ledger
    #[error("Player {player} has not entered tournament for day {day_id}")]
    NotEntered { player: String, day_id: DayId },

    /// Ledger RPC connection error
    #[error("Ledger RPC connection failed: {0}")]
    RpcConnection(String),

    /// Ledger RPC request error
    #[error("Ledger RPC request failed: {0}")]
    RpcRequest(String),

    /// Ledger RPC response error
    #[error("Ledger RPC response error: {message}")]
    RpcResponse { code: i64, message: String },

    /// Transaction mined but reverted by the contract
    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    /// Write was not confirmed within the configured bound
    #[error("Confirmation timeout after {waited_secs}s for {tx_hash}")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    /// Ledger call did not return within the configured bound
    #[error("Ledger call {operation} timed out after {waited_secs}s")]
    CallTimeout { operation: &'static str, waited_secs: u64 },

    /// Local transaction signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// ABI encode/decode error
    #[error("ABI error: {0}")]
    Abi(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Commit not found in the queue
    #[error("Commit not found: {0}")]
    CommitNotFound(String),
}

/// Anchor Result type
pub type AnchorResult<T> = Result<T, AnchorError>;

impl AnchorError {
    /// Caller-side error (bad input), as opposed to infrastructure
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotEntered { .. })
    }

    /// Status an HTTP producer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotEntered { .. } => 403,
            Self::CommitNotFound(_) => 404,
            _ => 503,
        }
    }
}

impl From<reqwest::Error> for AnchorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AnchorError::RpcRequest(format!("request timed out: {}", e))
        } else if e.is_connect() {
            AnchorError::RpcConnection(e.to_string())
        } else {
            AnchorError::RpcRequest(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AnchorError {
    fn from(e: serde_json::Error) -> Self {
        AnchorError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for AnchorError {
    fn from(e: hex::FromHexError) -> Self {
        AnchorError::Abi(format!("Hex decode error: {}", e))
    }
}

impl From<sled::Error> for AnchorError {
    fn from(e: sled::Error) -> Self {
        AnchorError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        let validation = AnchorError::from(CoreError::InvalidDayId("20251232".into()));
        assert!(validation.is_client_error());
        assert_eq!(validation.http_status(), 400);

        let storage = AnchorError::Storage("disk full".into());
        assert!(!storage.is_client_error());
        assert_eq!(storage.http_status(), 503);

        let timeout = AnchorError::ConfirmationTimeout {
            tx_hash: "0xabc".into(),
            waited_secs: 120,
        };
        assert_eq!(timeout.http_status(), 503);
    }
}
