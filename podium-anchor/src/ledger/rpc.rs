//! JSON-RPC Ledger Client
//!
//! Talks to an EVM node over JSON-RPC. Reads use `eth_call`. Writes are
//! signed locally and sent with `eth_sendRawTransaction` when an owner key is
//! configured, otherwise sent with `eth_sendTransaction` from a node-managed
//! account. Either way the client then polls `eth_getTransactionReceipt`
//! until the transaction is mined or the confirmation bound elapses.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::abi::{self, CallData};
use super::signer::{LegacyTransaction, LocalSigner};
use super::{BoundedLedger, LedgerClient};
use crate::config::LedgerRpcConfig;
use crate::error::{AnchorError, AnchorResult};
use podium_core::{DayId, LeaderboardDigest, LedgerDayInfo, PlayerId, TxRef, Winners};

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Transaction receipt (fields Podium reads)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    /// `0x1` success, `0x0` reverted
    pub status: Option<String>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }
}

/// Ledger client for an EVM JSON-RPC node
pub struct JsonRpcLedgerClient {
    /// HTTP client
    client: Client,
    /// RPC configuration
    config: LedgerRpcConfig,
    /// Request ID counter
    request_id: AtomicU64,
    /// Owner key, when writes are signed locally
    signer: Option<LocalSigner>,
    /// Chain id for signed writes, from config or asked once from the node
    chain_id: OnceCell<u64>,
}

impl JsonRpcLedgerClient {
    /// Create a new client
    pub fn new(config: LedgerRpcConfig) -> AnchorResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AnchorError::RpcConnection(e.to_string()))?;

        let signer = config.signer()?;
        match &signer {
            Some(signer) => info!("Ledger writes signed locally by {}", signer.address()),
            None => info!("Ledger writes sent from node account {}", config.sender_address),
        }

        Ok(Self {
            client,
            chain_id: OnceCell::new_with(config.chain_id),
            config,
            request_id: AtomicU64::new(0),
            signer,
        })
    }

    pub fn config(&self) -> &LedgerRpcConfig {
        &self.config
    }

    /// Account owner writes are sent from
    pub fn sender(&self) -> &str {
        match &self.signer {
            Some(signer) => signer.address().as_str(),
            None => &self.config.sender_address,
        }
    }

    fn auth_header(&self) -> Option<String> {
        let username = self.config.username.as_deref()?;
        let password = self.config.password.as_deref().unwrap_or_default();
        let credentials = format!("{}:{}", username, password);
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        ))
    }

    /// Make an RPC call whose result may be `null`
    async fn call_optional<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AnchorResult<Option<T>> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("Ledger RPC call: {} id={}", method, id);

        let mut builder = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .json(&request);
        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::RpcRequest(format!("HTTP {} - {}", status, body)));
        }

        let rpc_response: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| AnchorError::RpcRequest(e.to_string()))?;

        if let Some(error) = rpc_response.error {
            return Err(AnchorError::RpcResponse {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    /// Make an RPC call
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AnchorResult<T> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| AnchorError::RpcRequest(format!("Empty response for {}", method)))
    }

    /// Make an RPC call returning a hex quantity
    async fn call_quantity(&self, method: &str, params: serde_json::Value) -> AnchorResult<u64> {
        let hex_number: String = self.call(method, params).await?;
        parse_quantity(&hex_number)
    }

    /// Latest block number, used as a connectivity check
    pub async fn block_number(&self) -> AnchorResult<u64> {
        self.call_quantity("eth_blockNumber", serde_json::json!([])).await
    }

    async fn chain_id(&self) -> AnchorResult<u64> {
        self.chain_id
            .get_or_try_init(|| self.call_quantity("eth_chainId", serde_json::json!([])))
            .await
            .copied()
    }

    async fn eth_call(&self, data: &CallData) -> AnchorResult<String> {
        let params = serde_json::json!([
            { "to": self.config.contract_address, "data": data.to_hex() },
            "latest"
        ]);
        self.call("eth_call", params).await
    }

    async fn send_transaction(&self, data: &CallData) -> AnchorResult<TxRef> {
        if let Some(signer) = &self.signer {
            return self.send_signed(signer, data).await;
        }

        let params = serde_json::json!([{
            "from": self.config.sender_address,
            "to": self.config.contract_address,
            "data": data.to_hex(),
        }]);
        let hash: String = self.call("eth_sendTransaction", params).await?;
        Ok(TxRef::new(hash))
    }

    /// Fill nonce, gas and chain id from the node, sign, and send raw
    async fn send_signed(&self, signer: &LocalSigner, data: &CallData) -> AnchorResult<TxRef> {
        let from = signer.address().as_str();
        let contract = PlayerId::parse(&self.config.contract_address)
            .map_err(|e| AnchorError::Configuration(format!("contract address: {}", e)))?;
        let call = serde_json::json!({
            "from": from,
            "to": contract.as_str(),
            "data": data.to_hex(),
        });

        let nonce = self
            .call_quantity("eth_getTransactionCount", serde_json::json!([from, "pending"]))
            .await?;
        let gas_price = self.call_quantity("eth_gasPrice", serde_json::json!([])).await?;
        let estimate = self.call_quantity("eth_estimateGas", serde_json::json!([call])).await?;
        let chain_id = self.chain_id().await?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: with_gas_headroom(estimate),
            to: contract.to_bytes(),
            value: 0,
            data: data.as_bytes().to_vec(),
            chain_id,
        };
        debug!(
            "Signing tx from {} nonce={} gas={} chain={}",
            from, tx.nonce, tx.gas_limit, tx.chain_id
        );
        let raw = signer.sign(&tx)?;

        let hash: String = self
            .call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        Ok(TxRef::new(hash))
    }

    /// Get a receipt, `None` while the transaction is unmined
    pub async fn get_receipt(&self, tx: &TxRef) -> AnchorResult<Option<TransactionReceipt>> {
        self.call_optional("eth_getTransactionReceipt", serde_json::json!([tx.as_str()]))
            .await
    }

    /// Wait until a transaction is mined, bounded by the confirmation timeout
    pub async fn wait_for_confirmation(&self, tx: &TxRef) -> AnchorResult<TransactionReceipt> {
        poll_receipt(
            tx,
            self.config.confirmation_timeout(),
            self.config.receipt_poll_interval(),
            || self.get_receipt(tx),
        )
        .await
    }

    async fn write(&self, operation: &str, data: CallData) -> AnchorResult<TxRef> {
        let tx = self.send_transaction(&data).await?;
        info!("Submitted {} transaction {}", operation, tx);

        let receipt = self.wait_for_confirmation(&tx).await?;
        info!(
            "{} transaction {} confirmed in block {}",
            operation,
            tx,
            receipt.block_number.as_deref().unwrap_or("?")
        );
        Ok(tx)
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    async fn read_day_info(&self, day_id: DayId) -> AnchorResult<LedgerDayInfo> {
        let data = self.eth_call(&abi::get_day_info(day_id)).await?;
        abi::decode_day_info(&data)
    }

    async fn write_checkpoint(&self, day_id: DayId, digest: &LeaderboardDigest) -> AnchorResult<TxRef> {
        self.write("commitCheckpoint", abi::commit_checkpoint(day_id, digest))
            .await
    }

    async fn write_finalize(&self, day_id: DayId, winners: &Winners) -> AnchorResult<TxRef> {
        self.write("finalizeDay", abi::finalize_day(day_id, winners)).await
    }

    async fn has_entered(&self, day_id: DayId, player: &PlayerId) -> AnchorResult<bool> {
        let data = self.eth_call(&abi::has_entered(day_id, player)).await?;
        abi::decode_bool(&data)
    }
}

impl BoundedLedger<JsonRpcLedgerClient> {
    /// Connect to the configured node with time bounds derived from the config
    ///
    /// Reads are bounded by the request timeout; writes by the confirmation
    /// timeout plus room for the submit and the last receipt poll.
    pub fn connect(config: &LedgerRpcConfig) -> AnchorResult<Self> {
        let client = JsonRpcLedgerClient::new(config.clone())?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let write_timeout = config.confirmation_timeout() + request_timeout * 2;
        Ok(BoundedLedger::new(client, request_timeout, write_timeout))
    }
}

/// Poll `fetch` until a receipt shows up or `timeout` elapses
///
/// A mined receipt with a failed status is a revert. Poll errors are logged
/// and retried; only the bound ends the wait.
async fn poll_receipt<F, Fut>(
    tx: &TxRef,
    timeout: Duration,
    poll_interval: Duration,
    mut fetch: F,
) -> AnchorResult<TransactionReceipt>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AnchorResult<Option<TransactionReceipt>>>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(AnchorError::ConfirmationTimeout {
                tx_hash: tx.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }

        match fetch().await {
            Ok(Some(receipt)) if receipt.succeeded() => return Ok(receipt),
            Ok(Some(receipt)) => {
                return Err(AnchorError::TransactionReverted(format!(
                    "{} (status {})",
                    receipt.transaction_hash,
                    receipt.status.as_deref().unwrap_or("missing")
                )));
            }
            Ok(None) => {}
            Err(e) => warn!("Receipt poll for {} failed: {}", tx, e),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Gas estimate plus 20%
fn with_gas_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate / 5)
}

/// Parse a JSON-RPC hex quantity such as `0x1b4`
fn parse_quantity(value: &str) -> AnchorResult<u64> {
    let stripped = value
        .strip_prefix("0x")
        .ok_or_else(|| AnchorError::Abi(format!("quantity without 0x prefix: {}", value)))?;
    u64::from_str_radix(stripped, 16)
        .map_err(|e| AnchorError::Abi(format!("invalid quantity {}: {}", value, e)))
}
