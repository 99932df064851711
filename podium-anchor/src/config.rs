//! Anchor Layer Configuration
//!
//! Configuration for the ledger RPC connection, the worker and storage.
//! Supports loading from environment variables with the PODIUM_ prefix.

use chrono::{DateTime, Utc};
use podium_core::{CoreResult, DayId, PlayerId};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::{AnchorError, AnchorResult};
use crate::ledger::signer::LocalSigner;

/// Ledger JSON-RPC configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct LedgerRpcConfig {
    /// RPC endpoint URL
    pub url: String,
    /// Basic auth username (optional, for gated nodes)
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Tournament contract address
    pub contract_address: String,
    /// Node-managed account that signs owner-only writes
    ///
    /// May stay empty when `private_key` is set; if both are set they must agree.
    #[serde(default)]
    pub sender_address: String,
    /// Owner key for signing writes locally (hex, never serialized)
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,
    /// EIP-155 chain id; asked from the node when unset
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on waiting for a write to be confirmed
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// Receipt polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub receipt_poll_interval_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for LedgerRpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            username: None,
            password: None,
            contract_address: String::new(),
            sender_address: String::new(),
            private_key: None,
            chain_id: None,
            request_timeout_secs: 30,
            confirmation_timeout_secs: 120,
            receipt_poll_interval_secs: 2,
        }
    }
}

impl LedgerRpcConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - PODIUM_RPC_URL: RPC endpoint URL
    /// - PODIUM_RPC_USER / PODIUM_RPC_PASS: Basic auth credentials (optional)
    /// - PODIUM_CONTRACT_ADDRESS: Tournament contract address
    /// - PODIUM_SENDER_ADDRESS: Node-managed owner account used for writes
    /// - PODIUM_PRIVATE_KEY: Owner key; writes are signed locally when set
    /// - PODIUM_CHAIN_ID: Chain id for locally signed writes (optional)
    /// - PODIUM_RPC_TIMEOUT: Request timeout in seconds
    /// - PODIUM_CONFIRMATION_TIMEOUT: Confirmation bound in seconds
    /// - PODIUM_RECEIPT_POLL_INTERVAL: Receipt polling interval in seconds
    pub fn from_env() -> Self {
        Self {
            url: env::var("PODIUM_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            username: env::var("PODIUM_RPC_USER").ok(),
            password: env::var("PODIUM_RPC_PASS").ok(),
            contract_address: env::var("PODIUM_CONTRACT_ADDRESS").unwrap_or_default(),
            sender_address: env::var("PODIUM_SENDER_ADDRESS").unwrap_or_default(),
            private_key: env::var("PODIUM_PRIVATE_KEY").ok().filter(|key| !key.trim().is_empty()),
            chain_id: env_parse("PODIUM_CHAIN_ID"),
            request_timeout_secs: env_parse("PODIUM_RPC_TIMEOUT").unwrap_or(30),
            confirmation_timeout_secs: env_parse("PODIUM_CONFIRMATION_TIMEOUT").unwrap_or(120),
            receipt_poll_interval_secs: env_parse("PODIUM_RECEIPT_POLL_INTERVAL").unwrap_or(2),
        }
    }

    /// Local development node (anvil/hardhat defaults)
    pub fn development(contract_address: &str, sender_address: &str) -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            username: None,
            password: None,
            contract_address: contract_address.to_string(),
            sender_address: sender_address.to_string(),
            private_key: None,
            chain_id: None,
            request_timeout_secs: 10,
            confirmation_timeout_secs: 30,
            receipt_poll_interval_secs: 1,
        }
    }

    /// Writes cannot be sent without a contract and a sender or key
    pub fn validate(&self) -> AnchorResult<()> {
        if self.contract_address.is_empty() {
            return Err(AnchorError::Configuration(
                "contract address not configured".to_string(),
            ));
        }
        parse_address("contract", &self.contract_address)?;

        let sender = if self.sender_address.is_empty() {
            None
        } else {
            Some(parse_address("sender", &self.sender_address)?)
        };

        match (&self.private_key, sender) {
            (None, None) => Err(AnchorError::Configuration(
                "neither sender address nor private key configured".to_string(),
            )),
            (None, Some(_)) => Ok(()),
            (Some(key), sender) => {
                let signer = LocalSigner::from_hex(key)?;
                match sender {
                    Some(sender) if &sender != signer.address() => {
                        Err(AnchorError::Configuration(format!(
                            "sender address {} does not match private key account {}",
                            sender,
                            signer.address()
                        )))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Parsed local signer, if a private key is configured
    pub fn signer(&self) -> AnchorResult<Option<LocalSigner>> {
        self.private_key.as_deref().map(LocalSigner::from_hex).transpose()
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_secs(self.receipt_poll_interval_secs.max(1))
    }
}

fn parse_address(name: &str, address: &str) -> AnchorResult<PlayerId> {
    PlayerId::parse(address)
        .map_err(|e| AnchorError::Configuration(format!("{} address: {}", name, e)))
}

impl fmt::Debug for LedgerRpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerRpcConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("contract_address", &self.contract_address)
            .field("sender_address", &self.sender_address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("chain_id", &self.chain_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("receipt_poll_interval_secs", &self.receipt_poll_interval_secs)
            .finish()
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Checkpoint commits claimed per invocation
    #[serde(default = "default_checkpoint_batch")]
    pub checkpoint_batch_size: usize,
    /// Finalize commits claimed per invocation
    #[serde(default = "default_finalize_batch")]
    pub finalize_batch_size: usize,
    /// Wall-clock bound of one invocation in seconds
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Age after which a `processing` claim is considered abandoned
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
}

fn default_checkpoint_batch() -> usize {
    10
}

fn default_finalize_batch() -> usize {
    5
}

fn default_deadline() -> u64 {
    300
}

fn default_claim_lease() -> u64 {
    900
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            checkpoint_batch_size: 10,
            finalize_batch_size: 5,
            deadline_secs: 300,
            claim_lease_secs: 900,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    ///
    /// - PODIUM_CHECKPOINT_BATCH
    /// - PODIUM_FINALIZE_BATCH
    /// - PODIUM_WORKER_DEADLINE
    /// - PODIUM_CLAIM_LEASE
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkpoint_batch_size: env_parse("PODIUM_CHECKPOINT_BATCH")
                .unwrap_or(defaults.checkpoint_batch_size),
            finalize_batch_size: env_parse("PODIUM_FINALIZE_BATCH")
                .unwrap_or(defaults.finalize_batch_size),
            deadline_secs: env_parse("PODIUM_WORKER_DEADLINE").unwrap_or(defaults.deadline_secs),
            claim_lease_secs: env_parse("PODIUM_CLAIM_LEASE").unwrap_or(defaults.claim_lease_secs),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_lease_secs as i64)
    }
}

/// Finalization policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizePolicy {
    /// Distinct players required before a day may be finalized
    #[serde(default = "default_min_players")]
    pub min_players: usize,
    /// Consult the ledger latch before enqueueing
    #[serde(default = "default_true")]
    pub check_ledger: bool,
}

fn default_min_players() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for FinalizePolicy {
    fn default() -> Self {
        Self {
            min_players: 3,
            check_ledger: true,
        }
    }
}

/// Podium configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodiumConfig {
    /// Ledger RPC configuration
    pub ledger: LedgerRpcConfig,
    /// Worker configuration
    pub worker: WorkerConfig,
    /// Finalization policy
    pub finalize: FinalizePolicy,
    /// Directory of the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Reject scores from players the ledger has not seen enter
    #[serde(default)]
    pub require_entry: bool,
    /// Fixed day id for test runs
    #[serde(default)]
    pub test_day_id: Option<DayId>,
}

fn default_data_dir() -> String {
    "./podium_data".to_string()
}

impl Default for PodiumConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerRpcConfig::default(),
            worker: WorkerConfig::default(),
            finalize: FinalizePolicy::default(),
            data_dir: default_data_dir(),
            require_entry: false,
            test_day_id: None,
        }
    }
}

impl PodiumConfig {
    /// Load configuration from environment variables
    ///
    /// Besides the ledger and worker variables:
    /// - PODIUM_DATA_DIR: sled database directory
    /// - PODIUM_MIN_PLAYERS: players required to finalize
    /// - PODIUM_REQUIRE_ENTRY: check `hasEntered` before accepting scores
    /// - PODIUM_TEST_DAY_ID: override the current day (ignored if invalid)
    pub fn from_env() -> Self {
        let test_day_id = env::var("PODIUM_TEST_DAY_ID").ok().and_then(|raw| {
            match raw.parse::<DayId>() {
                Ok(day) => {
                    warn!("[TEST MODE] Using test day id: {}", day);
                    Some(day)
                }
                Err(e) => {
                    warn!("[TEST MODE] Ignoring PODIUM_TEST_DAY_ID={}: {}", raw, e);
                    None
                }
            }
        });

        Self {
            ledger: LedgerRpcConfig::from_env(),
            worker: WorkerConfig::from_env(),
            finalize: FinalizePolicy {
                min_players: env_parse("PODIUM_MIN_PLAYERS").unwrap_or(3),
                check_ledger: true,
            },
            data_dir: env::var("PODIUM_DATA_DIR").unwrap_or_else(|_| default_data_dir()),
            require_entry: env::var("PODIUM_REQUIRE_ENTRY")
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(false),
            test_day_id,
        }
    }

    /// In-process development configuration
    pub fn development() -> Self {
        Self {
            ledger: LedgerRpcConfig::development("", ""),
            worker: WorkerConfig {
                checkpoint_batch_size: 10,
                finalize_batch_size: 5,
                deadline_secs: 60,
                claim_lease_secs: 120,
            },
            finalize: FinalizePolicy::default(),
            data_dir: "./podium_dev_data".to_string(),
            require_entry: false,
            test_day_id: None,
        }
    }

    /// Day a submission without an explicit day belongs to
    pub fn current_day(&self, now: DateTime<Utc>) -> CoreResult<DayId> {
        match self.test_day_id {
            Some(day) => Ok(day),
            None => DayId::current(now),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_worker_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.checkpoint_batch_size, 10);
        assert_eq!(config.finalize_batch_size, 5);
        assert_eq!(config.deadline(), Duration::from_secs(300));
    }

    #[test]
    fn test_ledger_config_validation() {
        let config = LedgerRpcConfig::default();
        assert!(matches!(config.validate(), Err(AnchorError::Configuration(_))));

        let config = LedgerRpcConfig::development(
            "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.receipt_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_private_key_replaces_sender() {
        let dev_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

        let mut config = LedgerRpcConfig::development("0x5fbdb2315678afecb367f032d93f642f64180aa3", "");
        assert!(matches!(config.validate(), Err(AnchorError::Configuration(_))));

        config.private_key = Some(dev_key.to_string());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.signer().unwrap().unwrap().address().as_str(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        config.sender_address = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266".to_string();
        assert!(config.validate().is_ok());

        config.sender_address = "0x2222222222222222222222222222222222222222".to_string();
        assert!(matches!(config.validate(), Err(AnchorError::Configuration(_))));

        config.sender_address.clear();
        config.private_key = Some("0x1234".to_string());
        assert!(matches!(config.validate(), Err(AnchorError::Configuration(_))));
    }

    #[test]
    fn test_secrets_stay_out_of_logs_and_json() {
        let mut config = LedgerRpcConfig::development(
            "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
        );
        config.password = Some("hunter2".to_string());
        config.private_key = Some("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ac0974be"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ac0974be"));
        assert!(config.signer().unwrap().is_some());
        assert!(LedgerRpcConfig::default().signer().unwrap().is_none());
    }

    #[test]
    fn test_current_day_override() {
        let now = Utc.with_ymd_and_hms(2025, 12, 11, 12, 0, 0).unwrap();

        let config = PodiumConfig::development();
        assert_eq!(config.current_day(now).unwrap().as_u32(), 20251211);

        let config = PodiumConfig {
            test_day_id: Some(DayId::new(20251213).unwrap()),
            ..PodiumConfig::development()
        };
        assert_eq!(config.current_day(now).unwrap().as_u32(), 20251213);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let json = serde_json::json!({
            "ledger": {
                "url": "http://node:8545",
                "username": null,
                "password": null,
                "contract_address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "sender_address": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
            },
            "worker": {},
            "finalize": {}
        });
        let config: PodiumConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.ledger.confirmation_timeout_secs, 120);
        assert_eq!(config.worker.finalize_batch_size, 5);
        assert_eq!(config.finalize.min_players, 3);
        assert!(config.finalize.check_ledger);
        assert_eq!(config.data_dir, "./podium_data");
        assert!(config.test_day_id.is_none());
    }
}
