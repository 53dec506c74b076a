//! Background confirmation tracking for submitted drips.

use crate::database::{DripStatus, FaucetDatabase};
use crate::metrics::FaucetMetrics;
use crate::rpc::LedgerNode;
use chrono::{DateTime, Utc};
use drip_common::types::Hash;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Terminal state of a watched transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed,
    Reverted,
    /// No receipt within the attempt budget. Needs manual reconciliation.
    UnresolvedTimeout,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Reverted => "reverted",
            ConfirmationStatus::UnresolvedTimeout => "unresolved_timeout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationOutcome {
    pub tx_hash: Hash,
    pub status: ConfirmationStatus,
    /// Receipt polls performed
    pub attempts: u32,
    /// Set for confirmed and reverted outcomes
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Polls receipts and writes the terminal status back to the drip ledger.
pub struct ConfirmationWatcher {
    node: Arc<dyn LedgerNode>,
    database: Arc<FaucetDatabase>,
    metrics: Arc<FaucetMetrics>,
    config: WatcherConfig,
}

impl ConfirmationWatcher {
    pub fn new(
        node: Arc<dyn LedgerNode>,
        database: Arc<FaucetDatabase>,
        metrics: Arc<FaucetMetrics>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            node,
            database,
            metrics,
            config,
        }
    }

    /// Start watching on a detached task. Nothing needs to await the
    /// handle; the task ends on its own after at most `max_attempts` polls.
    pub fn spawn(self: &Arc<Self>, drip_id: u64, tx_hash: Hash) -> JoinHandle<ConfirmationOutcome> {
        let watcher = Arc::clone(self);
        watcher.metrics.watchers_in_flight.inc();
        tokio::spawn(async move {
            let outcome = watcher.watch(drip_id, tx_hash).await;
            watcher.metrics.watchers_in_flight.dec();
            outcome
        })
    }

    /// Poll until a receipt shows up or the attempts run out.
    pub async fn watch(&self, drip_id: u64, tx_hash: Hash) -> ConfirmationOutcome {
        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let receipt = match self.node.transaction_receipt(&tx_hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    debug!("No receipt for {} yet (attempt {})", tx_hash, attempt);
                    continue;
                }
                Err(e) => {
                    debug!("Receipt poll for {} failed (attempt {}): {}", tx_hash, attempt, e);
                    continue;
                }
            };

            let completed_at = Utc::now();
            let (status, drip_status, drip_error) = if receipt.success {
                info!("Drip {} confirmed: {}", drip_id, tx_hash);
                (ConfirmationStatus::Confirmed, DripStatus::Completed, None)
            } else {
                warn!("Drip {} reverted on chain: {}", drip_id, tx_hash);
                (
                    ConfirmationStatus::Reverted,
                    DripStatus::Reverted,
                    Some("execution reverted".to_string()),
                )
            };

            if let Err(e) = self
                .database
                .complete_drip(drip_id, drip_status, drip_error, completed_at)
            {
                error!("Failed to record {} for drip {}: {}", status, drip_id, e);
            }
            self.metrics.record_confirmation(status);

            return ConfirmationOutcome {
                tx_hash,
                status,
                attempts: attempt,
                completed_at: Some(completed_at),
            };
        }

        warn!(
            "Transaction {} for drip {} not confirmed after {} attempts; left pending for reconciliation",
            tx_hash, drip_id, self.config.max_attempts
        );
        self.metrics.record_confirmation(ConfirmationStatus::UnresolvedTimeout);

        ConfirmationOutcome {
            tx_hash,
            status: ConfirmationStatus::UnresolvedTimeout,
            attempts: self.config.max_attempts,
            completed_at: None,
        }
    }
}
