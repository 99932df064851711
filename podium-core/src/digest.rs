//! Leaderboard digest
//!
//! Checkpoints anchor a hash of the day's best-score projection. The digest is
//! a pure function of the ranked snapshot so that any observer holding the
//! off-chain rows can recompute and compare it with the on-chain value.
//!
//! # Canonical form
//!
//! ```text
//! rows   = best scores of the day
//! ranked = sort(rows) by score desc, player asc
//! json   = [{"player":"0x…","score":N}, …]   (compact, fields in this order)
//! digest = SHA256(json)
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::score::{rank, BestScore};

/// 32-byte leaderboard commitment, rendered as `0x`-prefixed hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaderboardDigest(pub [u8; 32]);

impl LeaderboardDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(input: &str) -> CoreResult<Self> {
        let stripped = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(stripped)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidPayload(format!("digest must be 32 bytes: {}", input)))?;
        Ok(Self(array))
    }
}

impl fmt::Display for LeaderboardDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for LeaderboardDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LeaderboardDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize)]
struct CanonicalEntry<'a> {
    player: &'a str,
    score: u64,
}

/// Rows of one day in leaderboard order
pub fn ranked(rows: &[BestScore]) -> Vec<BestScore> {
    let mut sorted = rows.to_vec();
    rank(&mut sorted);
    sorted
}

/// Canonical JSON bytes of a snapshot
pub fn canonical_bytes(rows: &[BestScore]) -> CoreResult<Vec<u8>> {
    let sorted = ranked(rows);
    let entries: Vec<CanonicalEntry<'_>> = sorted
        .iter()
        .map(|row| CanonicalEntry {
            player: row.player.as_str(),
            score: row.best_score,
        })
        .collect();
    Ok(serde_json::to_vec(&entries)?)
}

/// Digest of a best-score snapshot
pub fn leaderboard_digest(rows: &[BestScore]) -> CoreResult<LeaderboardDigest> {
    let bytes = canonical_bytes(rows)?;
    let hash = Sha256::digest(&bytes);
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hash);
    Ok(LeaderboardDigest(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::DayId;
    use crate::player::PlayerId;
    use chrono::Utc;

    fn row(b: u8, score: u64) -> BestScore {
        BestScore {
            player: PlayerId::from_bytes([b; 20]),
            day_id: DayId::new(20250601).unwrap(),
            best_score: score,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let rows = vec![row(1, 100), row(2, 90), row(3, 80)];
        let a = leaderboard_digest(&rows).unwrap();
        let b = leaderboard_digest(&rows).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_ignores_insert_order_of_ties() {
        let forward = vec![row(1, 50), row(2, 50), row(3, 70)];
        let reversed = vec![row(3, 70), row(2, 50), row(1, 50)];
        assert_eq!(
            leaderboard_digest(&forward).unwrap(),
            leaderboard_digest(&reversed).unwrap()
        );
    }

    #[test]
    fn test_digest_ignores_update_time() {
        let a = vec![row(1, 10)];
        let mut b = a.clone();
        b[0].updated_at = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(leaderboard_digest(&a).unwrap(), leaderboard_digest(&b).unwrap());
    }

    #[test]
    fn test_digest_changes_with_scores() {
        let a = vec![row(1, 100), row(2, 90)];
        let b = vec![row(1, 100), row(2, 91)];
        assert_ne!(leaderboard_digest(&a).unwrap(), leaderboard_digest(&b).unwrap());
    }

    #[test]
    fn test_canonical_form() {
        let bytes = canonical_bytes(&[row(0x0b, 5), row(0x0a, 9)]).unwrap();
        let expected = format!(
            "[{{\"player\":\"0x{}\",\"score\":9}},{{\"player\":\"0x{}\",\"score\":5}}]",
            "0a".repeat(20),
            "0b".repeat(20)
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn test_empty_snapshot_digest() {
        // SHA256("[]")
        let digest = leaderboard_digest(&[]).unwrap();
        assert_eq!(
            digest.to_hex(),
            "0x4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let digest = leaderboard_digest(&[row(1, 1)]).unwrap();
        let parsed = LeaderboardDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(parsed, digest);
        assert!(LeaderboardDigest::from_hex("0x1234").is_err());
    }
}
