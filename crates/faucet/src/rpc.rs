//! JSON-RPC access to the remote ledger node.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use drip_common::types::{Address, Hash};
use num_bigint::BigUint;
use serde_json::Value;
use std::time::Duration;

/// Inclusion receipt for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: Hash,
    /// `true` when execution succeeded, `false` when it reverted.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Operations the faucet consumes from a ledger node.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    /// Next usable nonce for `address`, counting pending transactions.
    async fn pending_nonce(&self, address: &Address) -> FaucetResult<u64>;

    async fn suggest_gas_price(&self) -> FaucetResult<BigUint>;

    async fn chain_id(&self) -> FaucetResult<u64>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<Hash>;

    /// `None` while the transaction is not yet included.
    async fn transaction_receipt(&self, tx_hash: &Hash) -> FaucetResult<Option<TransactionReceipt>>;

    async fn balance(&self, address: &Address) -> FaucetResult<BigUint>;

    async fn call(&self, contract: &Address, data: &[u8]) -> FaucetResult<Vec<u8>>;
}

/// RPC client for interacting with blockchain
pub struct BlockchainRpcClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl BlockchainRpcClient {
    pub fn new(rpc_url: String) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| FaucetError::RpcError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { rpc_url, client })
    }

    async fn request(&self, method: &str, params: Value) -> FaucetResult<Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::RpcError(format!("{} request failed: {}", method, e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| FaucetError::RpcError(format!("{} invalid response: {}", method, e)))?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FaucetError::RpcError(message));
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn request_str(&self, method: &str, params: Value) -> FaucetResult<String> {
        let value = self.request(method, params).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FaucetError::RpcError(format!("{} returned non-string result: {}", method, value)))
    }
}

#[async_trait]
impl LedgerNode for BlockchainRpcClient {
    async fn pending_nonce(&self, address: &Address) -> FaucetResult<u64> {
        let result = self
            .request_str(
                "eth_getTransactionCount",
                serde_json::json!([address.to_string(), "pending"]),
            )
            .await?;
        parse_quantity(&result)
    }

    async fn suggest_gas_price(&self) -> FaucetResult<BigUint> {
        let result = self.request_str("eth_gasPrice", serde_json::json!([])).await?;
        parse_big_quantity(&result)
    }

    async fn chain_id(&self) -> FaucetResult<u64> {
        let result = self.request_str("eth_chainId", serde_json::json!([])).await?;
        parse_quantity(&result)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<Hash> {
        let result = self
            .request_str(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        result
            .parse()
            .map_err(|e| FaucetError::RpcError(format!("Invalid transaction hash '{}': {}", result, e)))
    }

    async fn transaction_receipt(&self, tx_hash: &Hash) -> FaucetResult<Option<TransactionReceipt>> {
        let result = self
            .request(
                "eth_getTransactionReceipt",
                serde_json::json!([tx_hash.to_string()]),
            )
            .await?;
        parse_receipt(&result, tx_hash)
    }

    async fn balance(&self, address: &Address) -> FaucetResult<BigUint> {
        let result = self
            .request_str(
                "eth_getBalance",
                serde_json::json!([address.to_string(), "latest"]),
            )
            .await?;
        parse_big_quantity(&result)
    }

    async fn call(&self, contract: &Address, data: &[u8]) -> FaucetResult<Vec<u8>> {
        let result = self
            .request_str(
                "eth_call",
                serde_json::json!([
                    {
                        "to": contract.to_string(),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    "latest"
                ]),
            )
            .await?;
        hex::decode(result.trim_start_matches("0x"))
            .map_err(|e| FaucetError::RpcError(format!("Invalid eth_call result: {}", e)))
    }
}

/// Parse a hex quantity such as `0x1a` into a u64.
pub fn parse_quantity(value: &str) -> FaucetResult<u64> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| FaucetError::RpcError(format!("Invalid quantity '{}': {}", value, e)))
}

/// Parse a hex quantity of arbitrary width.
pub fn parse_big_quantity(value: &str) -> FaucetResult<BigUint> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| FaucetError::RpcError(format!("Invalid quantity '{}'", value)))
}

fn parse_receipt(value: &Value, tx_hash: &Hash) -> FaucetResult<Option<TransactionReceipt>> {
    if value.is_null() {
        return Ok(None);
    }

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| FaucetError::RpcError("Receipt without status".to_string()))?;

    let optional_quantity = |field: &str| -> FaucetResult<Option<u64>> {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()
    };

    Ok(Some(TransactionReceipt {
        transaction_hash: *tx_hash,
        success: parse_quantity(status)? == 1,
        block_number: optional_quantity("blockNumber")?,
        gas_used: optional_quantity("gasUsed")?,
    }))
}
