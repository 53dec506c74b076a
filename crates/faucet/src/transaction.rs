//! Building, signing and submitting faucet transfers.
//!
//! Both transfer mechanisms go through [`TransactionSubmitter::submit`]; the
//! difference between a native value transfer and an ERC20 `transfer` call
//! is captured entirely by [`TransferKind`].

use crate::amount::{to_quantity_bytes, to_word};
use crate::error::{FaucetError, FaucetResult};
use crate::nonce::NonceAllocator;
use crate::rpc::LedgerNode;
use crate::signer::SigningIdentity;
use drip_common::types::{Address, Hash};
use num_bigint::BigUint;
use rlp::RlpStream;
use std::sync::Arc;
use tracing::{error, info, warn};

/// ERC20 `transfer(address,uint256)` selector.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// ERC20 `balanceOf(address)` selector.
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Gas budget per transfer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimits {
    pub native: u64,
    pub token: u64,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            native: 21_000,
            // ERC20 transfers typically use ~65k
            token: 100_000,
        }
    }
}

/// How value reaches the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Native,
    ContractCall(Address),
}

impl TransferKind {
    /// Derive the kind from a registry contract address; empty means native.
    pub fn from_contract(contract: &str) -> FaucetResult<Self> {
        let contract = contract.trim();
        if contract.is_empty() {
            return Ok(TransferKind::Native);
        }
        contract
            .parse()
            .map(TransferKind::ContractCall)
            .map_err(|e| FaucetError::InvalidToken(format!("bad contract address '{}': {}", contract, e)))
    }

    /// Destination, attached value and calldata for a transfer.
    pub fn build(&self, recipient: &Address, amount: &BigUint) -> FaucetResult<TransferCall> {
        match self {
            TransferKind::Native => Ok(TransferCall {
                to: *recipient,
                value: amount.clone(),
                data: Vec::new(),
            }),
            TransferKind::ContractCall(contract) => Ok(TransferCall {
                to: *contract,
                value: BigUint::default(),
                data: encode_transfer_call(recipient, amount)?,
            }),
        }
    }

    pub fn gas_limit(&self, limits: &GasLimits) -> u64 {
        match self {
            TransferKind::Native => limits.native,
            TransferKind::ContractCall(_) => limits.token,
        }
    }
}

/// Message-level content of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub to: Address,
    pub value: BigUint,
    pub data: Vec<u8>,
}

/// `transfer(address,uint256)` calldata.
pub fn encode_transfer_call(recipient: &Address, amount: &BigUint) -> FaucetResult<Vec<u8>> {
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&recipient.to_word());
    data.extend_from_slice(&to_word(amount)?);
    Ok(data)
}

/// `balanceOf(address)` calldata.
pub fn encode_balance_of_call(owner: &Address) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&owner.to_word());
    data
}

/// Pre-EIP-2718 transaction signed under EIP-155.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: BigUint,
    pub gas_limit: u64,
    pub call: TransferCall,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&to_quantity_bytes(&self.gas_price));
        stream.append(&self.gas_limit);
        stream.append(&self.call.to.0.to_vec());
        stream.append(&to_quantity_bytes(&self.call.value));
        stream.append(&self.call.data);
    }

    /// Hash that gets signed: rlp(nonce, gasPrice, gas, to, value, data, chainId, 0, 0).
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_body(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak_hash::keccak(stream.out()).0
    }

    /// Sign and return the raw bytes ready for `eth_sendRawTransaction`
    /// together with their hash.
    pub fn sign(&self, identity: &SigningIdentity) -> FaucetResult<(Vec<u8>, Hash)> {
        let signature = identity.sign_digest(&self.signing_hash())?;
        let v = self.chain_id * 2 + 35 + u64::from(signature.recovery_id);

        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&trim_leading_zeros(&signature.r));
        stream.append(&trim_leading_zeros(&signature.s));

        let raw = stream.out().to_vec();
        let hash = Hash(keccak_hash::keccak(&raw).0);
        Ok((raw, hash))
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// The node already holds these exact bytes in its pool.
fn is_already_known(err: &FaucetError) -> bool {
    match err {
        FaucetError::RpcError(msg) => msg.to_lowercase().contains("already known"),
        _ => false,
    }
}

/// Builds, signs and submits transfers from the faucet account.
pub struct TransactionSubmitter {
    node: Arc<dyn LedgerNode>,
    identity: SigningIdentity,
    nonces: NonceAllocator,
    gas_limits: GasLimits,
}

impl TransactionSubmitter {
    pub fn new(node: Arc<dyn LedgerNode>, identity: SigningIdentity, gas_limits: GasLimits) -> Self {
        let nonces = NonceAllocator::new(node.clone(), identity.address());
        Self {
            node,
            identity,
            nonces,
            gas_limits,
        }
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub async fn transfer_native(&self, to: &Address, amount: &BigUint) -> FaucetResult<Hash> {
        self.submit(TransferKind::Native, to, amount).await
    }

    pub async fn transfer_token(&self, contract: &Address, to: &Address, amount: &BigUint) -> FaucetResult<Hash> {
        self.submit(TransferKind::ContractCall(*contract), to, amount).await
    }

    /// Send `amount` of the given kind to `to`. Returns once the node has
    /// accepted the transaction, not when it is included.
    pub async fn submit(&self, kind: TransferKind, to: &Address, amount: &BigUint) -> FaucetResult<Hash> {
        // Build the payload first so a bad amount never consumes a nonce
        let call = kind.build(to, amount)?;
        let nonce = self.nonces.allocate().await?;

        match self.sign_and_send(nonce, kind, call).await {
            Ok(hash) => {
                info!("Transaction {} sent with nonce {}", hash, nonce);
                Ok(hash)
            }
            Err(err) => {
                error!("Submission with nonce {} failed: {}", nonce, err);
                self.nonces.release(nonce).await;
                Err(err)
            }
        }
    }

    async fn sign_and_send(&self, nonce: u64, kind: TransferKind, call: TransferCall) -> FaucetResult<Hash> {
        let gas_price = self.node.suggest_gas_price().await?;
        let chain_id = self.node.chain_id().await?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: kind.gas_limit(&self.gas_limits),
            call,
            chain_id,
        };
        let (raw, local_hash) = tx.sign(&self.identity)?;

        let node_hash = match self.node.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(err) if is_already_known(&err) => {
                warn!("Transaction {} already in the node's pool", local_hash);
                return Ok(local_hash);
            }
            Err(err) => return Err(err),
        };
        if node_hash != local_hash {
            warn!("Node reported hash {} for locally computed {}", node_hash, local_hash);
        }
        Ok(node_hash)
    }
}
