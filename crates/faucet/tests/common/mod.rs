//! Shared fixtures: an in-process ledger node and a service wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use drip_common::types::{Address, Hash};
use drip_faucet::captcha::HumanVerifier;
use drip_faucet::clock::ManualClock;
use drip_faucet::kv::MemoryStore;
use drip_faucet::rpc::{LedgerNode, TransactionReceipt};
use drip_faucet::{FaucetConfig, FaucetDatabase, FaucetError, FaucetResult, FaucetService, KvBackend};
use num_bigint::BigUint;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Hardhat account #0
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

pub const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const CAPTCHA_PASS: &str = "human";

pub struct MockNode {
    pub start_nonce: u64,
    pub chain_id: u64,
    /// Receipt appears on this poll; `None` never
    pub receipt_after: Option<u32>,
    pub receipt_success: bool,
    /// Receipt polls that fail with a transport error before any answer
    pub receipt_errors: u32,
    pub fail_send: AtomicBool,
    /// Node errors returned by the next sends, in order
    pub rejections: Mutex<VecDeque<String>>,
    /// Raw bytes of rejected sends
    pub rejected: Mutex<Vec<Vec<u8>>>,
    pub nonce_fetches: AtomicU32,
    pub polls: AtomicU32,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub native_balance: AtomicU64,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            start_nonce: 7,
            chain_id: 11_155_111,
            receipt_after: Some(1),
            receipt_success: true,
            receipt_errors: 0,
            fail_send: AtomicBool::new(false),
            rejections: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(Vec::new()),
            nonce_fetches: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            native_balance: AtomicU64::new(2_500_000_000_000_000_000),
        }
    }

    pub fn with_receipt_after(mut self, polls: Option<u32>) -> Self {
        self.receipt_after = polls;
        self
    }

    pub fn with_receipt_errors(mut self, polls: u32) -> Self {
        self.receipt_errors = polls;
        self
    }

    pub fn reject_next(&self, message: &str) {
        self.rejections.lock().unwrap().push_back(message.to_string());
    }

    pub fn reverting(mut self) -> Self {
        self.receipt_success = false;
        self
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerNode for MockNode {
    async fn pending_nonce(&self, _address: &Address) -> FaucetResult<u64> {
        self.nonce_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.start_nonce)
    }

    async fn suggest_gas_price(&self) -> FaucetResult<BigUint> {
        Ok(BigUint::from(1_000_000_000u64))
    }

    async fn chain_id(&self) -> FaucetResult<u64> {
        Ok(self.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> FaucetResult<Hash> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(FaucetError::RpcError("insufficient funds for gas * price + value".to_string()));
        }
        if let Some(message) = self.rejections.lock().unwrap().pop_front() {
            self.rejected.lock().unwrap().push(raw.to_vec());
            return Err(FaucetError::RpcError(message));
        }
        self.sent.lock().unwrap().push(raw.to_vec());
        Ok(Hash(keccak_hash::keccak(raw).0))
    }

    async fn transaction_receipt(&self, tx_hash: &Hash) -> FaucetResult<Option<TransactionReceipt>> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll <= self.receipt_errors {
            return Err(FaucetError::RpcError("connection reset by peer".to_string()));
        }
        match self.receipt_after {
            Some(after) if poll >= after => Ok(Some(TransactionReceipt {
                transaction_hash: *tx_hash,
                success: self.receipt_success,
                block_number: Some(100),
                gas_used: Some(21_000),
            })),
            _ => Ok(None),
        }
    }

    async fn balance(&self, _address: &Address) -> FaucetResult<BigUint> {
        Ok(BigUint::from(self.native_balance.load(Ordering::SeqCst)))
    }

    async fn call(&self, _contract: &Address, data: &[u8]) -> FaucetResult<Vec<u8>> {
        if data.len() != 36 {
            return Err(FaucetError::RpcError("execution reverted".to_string()));
        }
        // 1234.5678 of a 6-decimal token
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&1_234_567_800u64.to_be_bytes());
        Ok(word.to_vec())
    }
}

/// Accepts only [`CAPTCHA_PASS`].
pub struct FixedVerifier;

#[async_trait]
impl HumanVerifier for FixedVerifier {
    async fn verify(&self, token: &str, _remote_ip: &str) -> FaucetResult<()> {
        if token == CAPTCHA_PASS {
            Ok(())
        } else {
            Err(FaucetError::CaptchaFailed("token rejected".to_string()))
        }
    }
}

pub fn test_config() -> FaucetConfig {
    FaucetConfig {
        private_key: DEV_KEY.to_string(),
        captcha_enabled: true,
        captcha_secret: "secret".to_string(),
        kv_backend: KvBackend::Memory,
        confirmation_poll_interval_secs: 0,
        confirmation_max_attempts: 5,
        ..FaucetConfig::default()
    }
}

pub struct Harness {
    pub service: Arc<FaucetService>,
    pub node: Arc<MockNode>,
    pub clock: Arc<ManualClock>,
    pub database: Arc<FaucetDatabase>,
}

pub fn harness(node: MockNode, config: FaucetConfig) -> Harness {
    let node = Arc::new(node);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let database = Arc::new(FaucetDatabase::temporary().unwrap());
    database.seed_tokens(&config.tokens).unwrap();

    let service = FaucetService::new(
        config,
        database.clone(),
        node.clone(),
        Arc::new(MemoryStore::new(clock.clone())),
        Arc::new(FixedVerifier),
        clock.clone(),
    )
    .unwrap();

    Harness {
        service: Arc::new(service),
        node,
        clock,
        database,
    }
}

pub fn drip_request(token_id: &str, fingerprint: &str) -> drip_faucet::DripRequest {
    drip_faucet::DripRequest {
        address: RECIPIENT.to_string(),
        token_id: token_id.to_string(),
        captcha_token: CAPTCHA_PASS.to_string(),
        fingerprint: fingerprint.to_string(),
    }
}
