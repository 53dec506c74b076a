//! Faucet service core logic

use crate::amount::format_units;
use crate::captcha::{AcceptAll, CaptchaVerifier, HumanVerifier};
use crate::clock::{Clock, SystemClock};
use crate::config::{FaucetConfig, KvBackend};
use crate::database::{DripRecord, DripStatus, FaucetDatabase};
use crate::error::{FaucetError, FaucetResult};
use crate::kv::{KeyValueStore, MemoryStore, SledStore};
use crate::metrics::FaucetMetrics;
use crate::ratelimit::{IpUsage, RateLimiter};
use crate::rpc::{BlockchainRpcClient, LedgerNode};
use crate::signer::SigningIdentity;
use crate::token::{Token, TokenRegistry};
use crate::transaction::{encode_balance_of_call, TransactionSubmitter, TransferKind};
use crate::watcher::{ConfirmationOutcome, ConfirmationWatcher};
use chrono::{DateTime, Utc};
use drip_common::types::Address;
use governor::{
    clock::{Clock as _, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-wide request throttle
type GlobalThrottle = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Resolves to the watcher handle once the transfer was accepted by the
/// node, or `None` when submission failed.
pub type SubmissionHandle = JoinHandle<Option<JoinHandle<ConfirmationOutcome>>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DripRequest {
    pub address: String,
    pub token_id: String,
    #[serde(default)]
    pub captcha_token: String,
    #[serde(default)]
    pub fingerprint: String,
}

/// Response to an admitted drip. The transaction hash is filled in on the
/// ledger record later, so it is always empty here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DripAccepted {
    pub success: bool,
    pub drip_id: u64,
    pub tx_hash: String,
    pub amount: String,
    pub token: String,
    pub message: String,
}

/// An admitted drip plus the handle of its background submission.
pub struct DripTicket {
    pub accepted: DripAccepted,
    pub submission: SubmissionHandle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDrip {
    pub tx_hash: Option<String>,
    pub amount: String,
    pub timestamp: DateTime<Utc>,
    pub status: DripStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDripStatus {
    pub token_id: String,
    pub token_symbol: String,
    pub last_drip: Option<LastDrip>,
    pub can_request: bool,
    /// Seconds until the cooldown for this token ends
    pub next_request_in: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStatus {
    pub drips: Vec<TokenDripStatus>,
    pub ip_rate_limit: IpUsage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOverview {
    #[serde(flatten)]
    pub token: Token,
    pub total_drips: u64,
    /// Faucet holdings in whole units
    pub balance: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStats {
    pub total_drips: u64,
    pub total_users: u64,
    /// Completed drips keyed by token symbol
    pub tokens_distributed: HashMap<String, u64>,
}

/// Everything a background submission needs, detached from the request.
#[derive(Clone)]
struct DripExecutor {
    submitter: Arc<TransactionSubmitter>,
    watcher: Arc<ConfirmationWatcher>,
    database: Arc<FaucetDatabase>,
    metrics: Arc<FaucetMetrics>,
}

impl DripExecutor {
    async fn execute(self, drip_id: u64, token: Token, recipient: Address) -> Option<JoinHandle<ConfirmationOutcome>> {
        let submitted = async {
            let kind = token.transfer_kind()?;
            let amount = token.drip_amount_units()?;
            match kind {
                TransferKind::Native => self.submitter.transfer_native(&recipient, &amount).await,
                TransferKind::ContractCall(contract) => {
                    self.submitter.transfer_token(&contract, &recipient, &amount).await
                }
            }
        }
        .await;

        match submitted {
            Ok(tx_hash) => {
                self.metrics.record_submission(true);
                info!("Drip {} submitted: {} {} to {} in {}", drip_id, token.drip_amount, token.symbol, recipient, tx_hash);
                if let Err(e) = self.database.mark_submitted(drip_id, &tx_hash.to_string()) {
                    error!("Failed to store tx hash for drip {}: {}", drip_id, e);
                }
                Some(self.watcher.spawn(drip_id, tx_hash))
            }
            Err(e) => {
                self.metrics.record_submission(false);
                error!("Drip {} failed: {}", drip_id, e);
                if let Err(db_err) = self.database.mark_failed(drip_id, &e.to_string()) {
                    error!("Failed to mark drip {} as failed: {}", drip_id, db_err);
                }
                None
            }
        }
    }
}

/// Faucet service
pub struct FaucetService {
    config: FaucetConfig,
    database: Arc<FaucetDatabase>,
    node: Arc<dyn LedgerNode>,
    store: Arc<dyn KeyValueStore>,
    tokens: TokenRegistry,
    limiter: RateLimiter,
    verifier: Arc<dyn HumanVerifier>,
    throttle: GlobalThrottle,
    metrics: Arc<FaucetMetrics>,
    clock: Arc<dyn Clock>,
    executor: DripExecutor,
}

impl FaucetService {
    /// Wire the service to a real node, captcha endpoint and counter store.
    pub fn connect(config: FaucetConfig, database: FaucetDatabase) -> FaucetResult<Self> {
        let database = Arc::new(database);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let node: Arc<dyn LedgerNode> = Arc::new(BlockchainRpcClient::new(config.rpc_url.clone())?);

        let store: Arc<dyn KeyValueStore> = match config.kv_backend {
            KvBackend::Memory => {
                warn!("Rate-limit counters are kept in memory and reset on restart");
                Arc::new(MemoryStore::new(clock.clone()))
            }
            KvBackend::Sled => Arc::new(SledStore::new(database.db(), clock.clone())?),
        };

        let verifier: Arc<dyn HumanVerifier> = if config.captcha_enabled {
            Arc::new(CaptchaVerifier::new(
                config.captcha_verify_url.clone(),
                config.captcha_secret.clone(),
            )?)
        } else {
            warn!("Captcha verification disabled");
            Arc::new(AcceptAll)
        };

        Self::new(config, database, node, store, verifier, clock)
    }

    pub fn new(
        config: FaucetConfig,
        database: Arc<FaucetDatabase>,
        node: Arc<dyn LedgerNode>,
        store: Arc<dyn KeyValueStore>,
        verifier: Arc<dyn HumanVerifier>,
        clock: Arc<dyn Clock>,
    ) -> FaucetResult<Self> {
        let identity = SigningIdentity::from_hex(&config.private_key)?;
        info!("Faucet address: {}", identity.address());

        let rpm = NonZeroU32::new(config.global_requests_per_minute).ok_or_else(|| {
            FaucetError::ConfigError("global_requests_per_minute must be positive".to_string())
        })?;
        let throttle = GovernorLimiter::direct(Quota::per_minute(rpm));

        let metrics = Arc::new(FaucetMetrics::new()?);
        let submitter = Arc::new(TransactionSubmitter::new(node.clone(), identity, config.gas_limits()));
        let watcher = Arc::new(ConfirmationWatcher::new(
            node.clone(),
            database.clone(),
            metrics.clone(),
            config.watcher_config(),
        ));
        let limiter = RateLimiter::new(store.clone(), clock.clone(), config.rate_limit_config());
        let tokens = TokenRegistry::new(database.clone(), config.token_cache_ttl());

        Ok(Self {
            executor: DripExecutor {
                submitter,
                watcher,
                database: database.clone(),
                metrics: metrics.clone(),
            },
            config,
            database,
            node,
            store,
            tokens,
            limiter,
            verifier,
            throttle,
            metrics,
            clock,
        })
    }

    pub fn faucet_address(&self) -> Address {
        self.executor.submitter.address()
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    pub fn database(&self) -> &Arc<FaucetDatabase> {
        &self.database
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    /// Admit a drip request and start its transfer in the background.
    pub async fn request_drip(&self, request: DripRequest, source_ip: &str) -> FaucetResult<DripAccepted> {
        Ok(self.dispatch_drip(request, source_ip).await?.accepted)
    }

    /// Same as [`request_drip`](Self::request_drip), also handing back the
    /// background submission.
    pub async fn dispatch_drip(&self, request: DripRequest, source_ip: &str) -> FaucetResult<DripTicket> {
        self.metrics.drip_requests_total.inc();
        info!("Drip request: address={}, token={}, ip={}", request.address, request.token_id, source_ip);

        let recipient = self.validate_address(&request.address).map_err(|e| {
            self.metrics.record_denial("invalid_address");
            e
        })?;
        let token = self.tokens.get_active(&request.token_id).await.map_err(|e| {
            self.metrics.record_denial("invalid_token");
            e
        })?;

        if let Err(not_until) = self.throttle.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            self.metrics.record_denial("global_throttle");
            warn!("Global request rate exceeded");
            return Err(FaucetError::RateLimited {
                reason: "Faucet is busy, please retry shortly".to_string(),
                retry_after: wait.as_secs().max(1),
            });
        }

        if let Err(e) = self.verifier.verify(&request.captcha_token, source_ip).await {
            self.metrics.record_denial("captcha");
            warn!("Captcha failed for {}: {}", source_ip, e);
            return Err(e);
        }

        let wallet = recipient.to_string();
        let admission = if self.config.strict_rate_limiting {
            self.limiter
                .reserve(&wallet, &token, source_ip, &request.fingerprint)
                .await?
        } else {
            self.limiter
                .check(&wallet, &token, source_ip, &request.fingerprint)
                .await?
        };
        if !admission.allowed {
            self.metrics.record_denial("rate_limited");
            warn!("Drip denied for {} ({}): {}", wallet, token.id, admission.reason);
            return Err(FaucetError::RateLimited {
                reason: admission.reason,
                retry_after: admission.retry_after,
            });
        }

        let mut record = DripRecord::pending(
            wallet.clone(),
            token.id.clone(),
            token.drip_amount.clone(),
            source_ip.to_string(),
            request.fingerprint.clone(),
        );
        record.created_at = self.clock.now();
        let drip_id = match self.database.create_drip(record) {
            Ok(id) => id,
            Err(e) => {
                if self.config.strict_rate_limiting {
                    self.limiter
                        .release(&wallet, &token, source_ip, &request.fingerprint)
                        .await;
                }
                return Err(e);
            }
        };

        let submission = tokio::spawn(self.executor.clone().execute(drip_id, token.clone(), recipient));

        if !self.config.strict_rate_limiting {
            // The transfer is already under way; a failure here only loosens limits
            if let Err(e) = self
                .limiter
                .record(&wallet, &token, source_ip, &request.fingerprint)
                .await
            {
                error!("Failed to record drip {} in rate limiter: {}", drip_id, e);
            }
        }

        Ok(DripTicket {
            accepted: DripAccepted {
                success: true,
                drip_id,
                tx_hash: String::new(),
                amount: token.drip_amount.clone(),
                token: token.symbol.clone(),
                message: format!("Sending {} {} to your address", token.drip_amount, token.symbol),
            },
            submission,
        })
    }

    fn validate_address(&self, address: &str) -> FaucetResult<Address> {
        if !Address::is_hex_address(address) {
            return Err(FaucetError::InvalidAddress(format!("'{}' is not a hex address", address)));
        }
        let address: Address = address
            .parse()
            .map_err(|e| FaucetError::InvalidAddress(format!("{}", e)))?;
        if address.is_zero() {
            return Err(FaucetError::InvalidAddress("Zero address not allowed".to_string()));
        }
        if address == self.faucet_address() {
            return Err(FaucetError::InvalidAddress("Cannot send to faucet address".to_string()));
        }
        Ok(address)
    }

    /// Per-token cooldown view for `address` and the caller's daily usage.
    pub async fn status(&self, address: &str, source_ip: &str) -> FaucetResult<AddressStatus> {
        if !Address::is_hex_address(address) {
            return Err(FaucetError::InvalidAddress(format!("'{}' is not a hex address", address)));
        }
        let address: Address = address
            .parse()
            .map_err(|e| FaucetError::InvalidAddress(format!("{}", e)))?;
        let recipient = address.to_string();
        let now = self.clock.now();

        let mut drips = Vec::new();
        for token in self.tokens.list_active()? {
            let latest = self.database.latest_drip(&recipient, &token.id)?;
            let (can_request, next_request_in) = match &latest {
                Some(record) => {
                    let elapsed = (now - record.created_at).num_seconds();
                    let cooldown = token.cooldown().as_secs() as i64;
                    if elapsed >= cooldown {
                        (true, 0)
                    } else {
                        (false, cooldown - elapsed)
                    }
                }
                None => (true, 0),
            };

            drips.push(TokenDripStatus {
                token_id: token.id.clone(),
                token_symbol: token.symbol.clone(),
                last_drip: latest.map(|record| LastDrip {
                    tx_hash: record.tx_hash,
                    amount: record.amount,
                    timestamp: record.created_at,
                    status: record.status,
                }),
                can_request,
                next_request_in,
            });
        }

        Ok(AddressStatus {
            drips,
            ip_rate_limit: self.limiter.usage(source_ip).await?,
        })
    }

    /// Active tokens with completed drip counts and faucet balances.
    pub async fn tokens(&self) -> FaucetResult<Vec<TokenOverview>> {
        let stats = self.database.get_statistics()?;
        let mut overview = Vec::new();
        for token in self.tokens.list_active()? {
            let balance = self.token_balance(&token).await;
            overview.push(TokenOverview {
                total_drips: stats.per_token.get(&token.id).copied().unwrap_or(0),
                balance,
                token,
            });
        }
        Ok(overview)
    }

    async fn token_balance(&self, token: &Token) -> String {
        let faucet = self.faucet_address();
        let result: FaucetResult<String> = async {
            match token.transfer_kind()? {
                TransferKind::Native => {
                    let balance = self.node.balance(&faucet).await?;
                    Ok(format_units(&balance, token.decimals, 6))
                }
                TransferKind::ContractCall(contract) => {
                    let raw = self.node.call(&contract, &encode_balance_of_call(&faucet)).await?;
                    let balance = BigUint::from_bytes_be(&raw);
                    Ok(format_units(&balance, token.decimals, 2))
                }
            }
        }
        .await;

        result.unwrap_or_else(|e| {
            debug!("Balance lookup for {} failed: {}", token.id, e);
            "0".to_string()
        })
    }

    pub fn stats(&self) -> FaucetResult<FaucetStats> {
        let stats = self.database.get_statistics()?;
        let mut tokens_distributed = HashMap::new();
        for (token_id, count) in stats.per_token {
            let symbol = self
                .database
                .get_token(&token_id)?
                .map(|t| t.symbol)
                .unwrap_or(token_id);
            *tokens_distributed.entry(symbol).or_insert(0) += count;
        }

        Ok(FaucetStats {
            total_drips: stats.total_drips,
            total_users: stats.total_users,
            tokens_distributed,
        })
    }

    /// Housekeeping: prune old drip records and expired counters.
    pub async fn cleanup(&self) -> FaucetResult<(usize, usize)> {
        let records = self
            .database
            .cleanup_old_records(self.clock.now(), self.config.record_retention_days)?;
        let counters = self.store.purge_expired().await?;
        if counters > 0 {
            debug!("Purged {} expired rate-limit counters", counters);
        }
        Ok((records, counters))
    }
}
