//! Core Error Types
//!
//! Validation and state-machine errors shared by every Podium crate.

use thiserror::Error;

use crate::commit::CommitStatus;

/// Core error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Day id is not an eight digit UTC calendar date
    #[error("Invalid day id: {0}")]
    InvalidDayId(String),

    /// Date falls outside the range a day id can encode
    #[error("Date out of day id range: {0}")]
    DateOutOfRange(String),

    /// Player identity is not a wallet address
    #[error("Invalid player: {0}")]
    InvalidPlayer(String),

    /// Score could not be accepted
    #[error("Invalid score: {0}")]
    InvalidScore(String),

    /// Commit payload does not match its kind or is malformed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Commit status transition not allowed by the state machine
    #[error("Invalid commit transition: {from} -> {to}")]
    InvalidTransition { from: CommitStatus, to: CommitStatus },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Core Result type
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for CoreError {
    fn from(e: hex::FromHexError) -> Self {
        CoreError::Serialization(format!("Hex decode error: {}", e))
    }
}
