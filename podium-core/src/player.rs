//! Player identity
//!
//! Players are identified by the wallet that entered the day's tournament.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Hex characters in a wallet address (without the `0x` prefix)
const ADDRESS_HEX_LEN: usize = 40;

/// Wallet address, normalized to lowercase `0x` + 40 hex characters
///
/// Normalization happens once at the producer boundary so that the same wallet
/// always sorts and hashes identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    /// Parse and normalize a wallet address
    pub fn parse(input: &str) -> CoreResult<Self> {
        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| CoreError::InvalidPlayer(format!("missing 0x prefix: {}", input)))?;

        if hex_part.len() != ADDRESS_HEX_LEN {
            return Err(CoreError::InvalidPlayer(format!(
                "expected {} hex characters, got {}",
                ADDRESS_HEX_LEN,
                hex_part.len()
            )));
        }
        if !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidPlayer(format!("non-hex character in {}", input)));
        }

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    /// The zero address, used by the ledger for unset winner slots
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(ADDRESS_HEX_LEN)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 20 address bytes
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // validated on construction
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }

    /// Build from raw address bytes
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }
}

impl TryFrom<String> for PlayerId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PlayerId> for String {
    fn from(player: PlayerId) -> Self {
        player.0
    }
}

impl FromStr for PlayerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
