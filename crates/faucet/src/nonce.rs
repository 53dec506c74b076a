//! Nonce allocation for the single faucet account.

use crate::error::{FaucetError, FaucetResult};
use crate::rpc::LedgerNode;
use drip_common::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hands out gap-free nonces for one account.
///
/// The counter is lazily loaded from the node's pending nonce on first use
/// and lives only in memory afterwards.
pub struct NonceAllocator {
    node: Arc<dyn LedgerNode>,
    address: Address,
    current: Mutex<Option<u64>>,
}

impl NonceAllocator {
    pub fn new(node: Arc<dyn LedgerNode>, address: Address) -> Self {
        Self {
            node,
            address,
            current: Mutex::new(None),
        }
    }

    /// Reserve the next nonce.
    pub async fn allocate(&self) -> FaucetResult<u64> {
        let mut current = self.current.lock().await;

        let nonce = match *current {
            Some(nonce) => nonce,
            None => {
                // Only network call made under the lock; once per process
                let fetched = self.node.pending_nonce(&self.address).await?;
                info!("Loaded pending nonce {} for {}", fetched, self.address);
                fetched
            }
        };

        let next = nonce
            .checked_add(1)
            .ok_or_else(|| FaucetError::RpcError(format!("Nonce {} out of range", nonce)))?;
        *current = Some(next);
        debug!("Allocated nonce {}", nonce);
        Ok(nonce)
    }

    /// Give back a nonce whose transaction never reached the network.
    ///
    /// Decrements by one while the counter is positive. When failures
    /// complete out of order the counter is only approximately right.
    pub async fn release(&self, nonce: u64) {
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(value) if *value > 0 => {
                *value -= 1;
                debug!("Released nonce {}, next is {}", nonce, *value);
            }
            _ => warn!("Release of nonce {} ignored, counter not positive", nonce),
        }
    }

    /// Next value `allocate` would return, if loaded.
    pub async fn peek(&self) -> Option<u64> {
        *self.current.lock().await
    }
}
