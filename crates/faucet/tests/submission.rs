//! Submitter nonce handling against node rejections.

mod common;

use common::*;
use drip_common::types::{Address, Hash};
use drip_faucet::signer::SigningIdentity;
use drip_faucet::transaction::{GasLimits, TransactionSubmitter};
use drip_faucet::watcher::ConfirmationStatus;
use drip_faucet::{DripStatus, FaucetError};
use num_bigint::BigUint;
use rlp::Rlp;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const USDC: &str = "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238";

fn submitter(node: &Arc<MockNode>) -> TransactionSubmitter {
    let identity = SigningIdentity::from_hex(DEV_KEY).unwrap();
    TransactionSubmitter::new(node.clone(), identity, GasLimits::default())
}

fn nonce_of(raw: &[u8]) -> u64 {
    Rlp::new(raw).val_at(0).unwrap()
}

fn recipient() -> Address {
    RECIPIENT.parse().unwrap()
}

#[tokio::test]
async fn test_rejected_nonce_is_not_handed_out_twice() {
    let node = Arc::new(MockNode::new());
    let submitter = submitter(&node);
    let usdc: Address = USDC.parse().unwrap();

    submitter
        .transfer_native(&recipient(), &BigUint::from(1u8))
        .await
        .unwrap();

    node.reject_next("nonce too low");
    let err = submitter
        .transfer_token(&usdc, &recipient(), &BigUint::from(100u8))
        .await
        .unwrap_err();
    assert!(matches!(err, FaucetError::RpcError(_)));

    submitter
        .transfer_native(&recipient(), &BigUint::from(2u8))
        .await
        .unwrap();

    let sent: Vec<u64> = node.sent().iter().map(|raw| nonce_of(raw)).collect();
    assert_eq!(sent, vec![7, 8]);
    let rejected = node.rejected.lock().unwrap().clone();
    assert_eq!(nonce_of(&rejected[0]), 8);
    assert_eq!(node.nonce_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_already_known_counts_as_sent() {
    let node = Arc::new(MockNode::new());
    let submitter = submitter(&node);

    node.reject_next("already known");
    let hash = submitter
        .transfer_native(&recipient(), &BigUint::from(1u8))
        .await
        .unwrap();
    let rejected = node.rejected.lock().unwrap().clone();
    assert_eq!(hash, Hash(keccak_hash::keccak(&rejected[0]).0));

    // The nonce stays consumed
    submitter
        .transfer_native(&recipient(), &BigUint::from(1u8))
        .await
        .unwrap();
    assert_eq!(nonce_of(&node.sent()[0]), 8);
}

#[tokio::test]
async fn test_already_known_drip_is_watched() {
    let h = harness(MockNode::new(), test_config());
    h.node.reject_next("already known");

    let ticket = h
        .service
        .dispatch_drip(drip_request("eth", ""), "203.0.113.9")
        .await
        .unwrap();
    let watch = ticket.submission.await.unwrap().expect("drip should be submitted");
    let outcome = watch.await.unwrap();
    assert_eq!(outcome.status, ConfirmationStatus::Confirmed);

    let rejected = h.node.rejected.lock().unwrap().clone();
    let record = h.database.get_drip(ticket.accepted.drip_id).unwrap().unwrap();
    assert_eq!(record.status, DripStatus::Completed);
    assert_eq!(
        record.tx_hash,
        Some(Hash(keccak_hash::keccak(&rejected[0]).0).to_string())
    );
}
