//! Contract call encoding
//!
//! Minimal ABI codec for the tournament contract. Every argument and return
//! value the contract uses is a static type, so calldata is the 4-byte
//! selector followed by one 32-byte word per scalar (fixed-size arrays are
//! laid out inline).

use sha3::{Digest, Keccak256};

use crate::error::{AnchorError, AnchorResult};
use podium_core::{DayId, LeaderboardDigest, LedgerDayInfo, PlayerId, Winners, WINNER_SLOTS};

pub const GET_DAY_INFO: &str = "getDayInfo(uint256)";
pub const HAS_ENTERED: &str = "hasEntered(uint256,address)";
pub const COMMIT_CHECKPOINT: &str = "commitCheckpoint(uint256,bytes32)";
pub const FINALIZE_DAY: &str = "finalizeDay(uint256,address[3],uint256[3])";

/// Words returned by `getDayInfo`: pool, finalized, count, winners[3], scores[3]
const DAY_INFO_WORDS: usize = 3 + 2 * WINNER_SLOTS;

type Word = [u8; 32];

/// First four bytes of the Keccak-256 of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata builder
#[derive(Debug, Clone)]
pub struct CallData {
    bytes: Vec<u8>,
}

impl CallData {
    pub fn new(signature: &str) -> Self {
        Self {
            bytes: selector(signature).to_vec(),
        }
    }

    pub fn uint(mut self, value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        self.bytes.extend_from_slice(&word);
        self
    }

    pub fn day(self, day_id: DayId) -> Self {
        self.uint(u128::from(day_id.as_u32()))
    }

    pub fn address(mut self, player: &PlayerId) -> Self {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&player.to_bytes());
        self.bytes.extend_from_slice(&word);
        self
    }

    pub fn bytes32(mut self, value: &[u8; 32]) -> Self {
        self.bytes.extend_from_slice(value);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `0x`-prefixed hex, the form JSON-RPC expects
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes))
    }
}

pub fn get_day_info(day_id: DayId) -> CallData {
    CallData::new(GET_DAY_INFO).day(day_id)
}

pub fn has_entered(day_id: DayId, player: &PlayerId) -> CallData {
    CallData::new(HAS_ENTERED).day(day_id).address(player)
}

pub fn commit_checkpoint(day_id: DayId, digest: &LeaderboardDigest) -> CallData {
    CallData::new(COMMIT_CHECKPOINT).day(day_id).bytes32(digest.as_bytes())
}

pub fn finalize_day(day_id: DayId, winners: &Winners) -> CallData {
    let call = winners
        .winners
        .iter()
        .fold(CallData::new(FINALIZE_DAY).day(day_id), |call, player| call.address(player));
    winners
        .scores
        .iter()
        .fold(call, |call, score| call.uint(u128::from(*score)))
}

// ==================== 解码 ====================

/// Split hex return data into 32-byte words
pub fn decode_words(data: &str) -> AnchorResult<Vec<Word>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(stripped)?;
    if bytes.len() % 32 != 0 {
        return Err(AnchorError::Abi(format!(
            "return data is {} bytes, not a whole number of words",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn word_to_u128(word: &Word) -> AnchorResult<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(AnchorError::Abi("uint256 value exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn word_to_u64(word: &Word) -> AnchorResult<u64> {
    let value = word_to_u128(word)?;
    u64::try_from(value).map_err(|_| AnchorError::Abi(format!("value {} exceeds 64 bits", value)))
}

fn word_to_bool(word: &Word) -> AnchorResult<bool> {
    match word_to_u128(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(AnchorError::Abi(format!("invalid bool word: {}", other))),
    }
}

fn word_to_address(word: &Word) -> AnchorResult<PlayerId> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(AnchorError::Abi("address word has dirty high bytes".to_string()));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(PlayerId::from_bytes(bytes))
}

/// Decode a single `bool` return value
pub fn decode_bool(data: &str) -> AnchorResult<bool> {
    let words = decode_words(data)?;
    let word = words
        .first()
        .ok_or_else(|| AnchorError::Abi("empty return data for bool".to_string()))?;
    word_to_bool(word)
}

/// Decode the `getDayInfo` tuple
pub fn decode_day_info(data: &str) -> AnchorResult<LedgerDayInfo> {
    let words = decode_words(data)?;
    if words.len() < DAY_INFO_WORDS {
        return Err(AnchorError::Abi(format!(
            "getDayInfo returned {} words, expected {}",
            words.len(),
            DAY_INFO_WORDS
        )));
    }

    let mut info = LedgerDayInfo {
        total_pool: word_to_u128(&words[0])?,
        finalized: word_to_bool(&words[1])?,
        checkpoint_count: word_to_u64(&words[2])?,
        ..Default::default()
    };
    for slot in 0..WINNER_SLOTS {
        info.winners[slot] = word_to_address(&words[3 + slot])?;
        info.winner_scores[slot] = word_to_u64(&words[3 + WINNER_SLOTS + slot])?;
    }
    Ok(info)
}
