//! Multi-axis drip admission: per wallet+token cooldown, per source daily
//! cap, per device fingerprint daily cap.

use crate::clock::Clock;
use crate::error::FaucetResult;
use crate::kv::KeyValueStore;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub ip_daily_limit: u32,
    pub fingerprint_daily_limit: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_daily_limit: 3,
            fingerprint_daily_limit: 2,
            window: Duration::from_secs(24 * 3600),
        }
    }
}

/// Admission decision. `retry_after` is in seconds and zero when allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    pub retry_after: u64,
    pub reason: String,
}

impl RateLimitCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: 0,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>, retry_after: u64) -> Self {
        Self {
            allowed: false,
            retry_after,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpUsage {
    pub used: u32,
    pub limit: u32,
    pub can_request: bool,
}

pub fn wallet_key(wallet: &str, token_id: &str) -> String {
    format!("faucet:wallet:{}:{}", wallet.to_lowercase(), token_id)
}

pub fn ip_key(source: &str) -> String {
    format!("faucet:ip:{}", source)
}

pub fn fingerprint_key(fingerprint: &str) -> String {
    format!("faucet:fp:{}", fingerprint)
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Evaluate all axes in priority order without touching any state.
    pub async fn check(
        &self,
        wallet: &str,
        token: &Token,
        source: &str,
        fingerprint: &str,
    ) -> FaucetResult<RateLimitCheck> {
        if let Some(denial) = self.cooldown_denial(wallet, token).await? {
            return Ok(denial);
        }

        let ip_key = ip_key(source);
        if self.count(&ip_key).await? >= i64::from(self.config.ip_daily_limit) {
            let retry_after = self.counter_ttl(&ip_key).await?;
            debug!("Source {} over daily cap", source);
            return Ok(RateLimitCheck::deny(self.ip_reason(), retry_after));
        }

        if !fingerprint.is_empty() {
            let fp_key = fingerprint_key(fingerprint);
            if self.count(&fp_key).await? >= i64::from(self.config.fingerprint_daily_limit) {
                let retry_after = self.counter_ttl(&fp_key).await?;
                debug!("Fingerprint {} over daily cap", fingerprint);
                return Ok(RateLimitCheck::deny(self.fingerprint_reason(), retry_after));
            }
        }

        Ok(RateLimitCheck::allow())
    }

    /// Account for an admitted drip.
    pub async fn record(&self, wallet: &str, token: &Token, source: &str, fingerprint: &str) -> FaucetResult<()> {
        let now = self.clock.now().timestamp();
        self.store
            .set(&wallet_key(wallet, &token.id), &now.to_string(), token.cooldown())
            .await?;

        self.bump(&ip_key(source)).await?;
        if !fingerprint.is_empty() {
            self.bump(&fingerprint_key(fingerprint)).await?;
        }
        Ok(())
    }

    /// Check and record as one step against the store: counters are
    /// incremented first and rolled back when the new value exceeds the cap,
    /// and the cooldown is claimed with set-if-absent. Concurrent identical
    /// requests cannot both be admitted.
    pub async fn reserve(
        &self,
        wallet: &str,
        token: &Token,
        source: &str,
        fingerprint: &str,
    ) -> FaucetResult<RateLimitCheck> {
        if let Some(denial) = self.cooldown_denial(wallet, token).await? {
            return Ok(denial);
        }

        let ip_key = ip_key(source);
        if self.bump(&ip_key).await? > i64::from(self.config.ip_daily_limit) {
            self.store.decr(&ip_key).await?;
            let retry_after = self.counter_ttl(&ip_key).await?;
            return Ok(RateLimitCheck::deny(self.ip_reason(), retry_after));
        }

        let fp_key = (!fingerprint.is_empty()).then(|| fingerprint_key(fingerprint));
        if let Some(fp_key) = &fp_key {
            if self.bump(fp_key).await? > i64::from(self.config.fingerprint_daily_limit) {
                self.store.decr(fp_key).await?;
                self.store.decr(&ip_key).await?;
                let retry_after = self.counter_ttl(fp_key).await?;
                return Ok(RateLimitCheck::deny(self.fingerprint_reason(), retry_after));
            }
        }

        let now = self.clock.now().timestamp();
        let claimed = self
            .store
            .set_if_absent(&wallet_key(wallet, &token.id), &now.to_string(), token.cooldown())
            .await?;
        if !claimed {
            // Lost the race to a concurrent request for the same wallet and token
            self.store.decr(&ip_key).await?;
            if let Some(fp_key) = &fp_key {
                self.store.decr(fp_key).await?;
            }
            return Ok(self
                .cooldown_denial(wallet, token)
                .await?
                .unwrap_or_else(|| RateLimitCheck::deny(self.cooldown_reason(0), 0)));
        }

        Ok(RateLimitCheck::allow())
    }

    /// Undo a successful [`reserve`](Self::reserve) whose drip was never
    /// created. Failures are logged; the caller already has an error to return.
    pub async fn release(&self, wallet: &str, token: &Token, source: &str, fingerprint: &str) {
        let mut undo = vec![self.store.decr(&ip_key(source)).await.map(|_| ())];
        if !fingerprint.is_empty() {
            undo.push(self.store.decr(&fingerprint_key(fingerprint)).await.map(|_| ()));
        }
        undo.push(self.store.delete(&wallet_key(wallet, &token.id)).await.map(|_| ()));

        for result in undo {
            if let Err(e) = result {
                warn!("Failed to release reservation for {} ({}): {}", wallet, token.id, e);
            }
        }
    }

    /// Daily usage of a source address.
    pub async fn usage(&self, source: &str) -> FaucetResult<IpUsage> {
        let used = self.count(&ip_key(source)).await?.max(0) as u32;
        let limit = self.config.ip_daily_limit;
        Ok(IpUsage {
            used,
            limit,
            can_request: used < limit,
        })
    }

    async fn cooldown_denial(&self, wallet: &str, token: &Token) -> FaucetResult<Option<RateLimitCheck>> {
        let key = wallet_key(wallet, &token.id);
        let Some(last) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let Ok(last) = last.parse::<i64>() else {
            warn!("Ignoring malformed cooldown timestamp at {}", key);
            return Ok(None);
        };

        let elapsed = self.clock.now().timestamp() - last;
        let cooldown = token.cooldown().as_secs() as i64;
        if elapsed < cooldown {
            let retry_after = (cooldown - elapsed) as u64;
            debug!("{} cooling down for {}s", key, retry_after);
            return Ok(Some(RateLimitCheck::deny(self.cooldown_reason(retry_after), retry_after)));
        }
        Ok(None)
    }

    async fn count(&self, key: &str) -> FaucetResult<i64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Increment a daily counter. The window starts at the first increment.
    async fn bump(&self, key: &str) -> FaucetResult<i64> {
        let count = self.store.incr(key).await?;
        if count == 1 {
            self.store.expire(key, self.config.window).await?;
        }
        Ok(count)
    }

    async fn counter_ttl(&self, key: &str) -> FaucetResult<u64> {
        match self.store.ttl(key).await? {
            Some(ttl) => Ok(ttl.as_secs()),
            None => {
                // A counter without expiry would block its subject forever
                warn!("Counter {} had no expiry, resetting window", key);
                self.store.expire(key, self.config.window).await?;
                Ok(self.config.window.as_secs())
            }
        }
    }

    fn cooldown_reason(&self, retry_after: u64) -> String {
        format!("Wallet cooldown for this token: {} hours remaining", retry_after / 3600)
    }

    fn ip_reason(&self) -> String {
        format!("IP daily limit reached ({} requests per day)", self.config.ip_daily_limit)
    }

    fn fingerprint_reason(&self) -> String {
        format!("Device limit exceeded ({} per day)", self.config.fingerprint_daily_limit)
    }
}
