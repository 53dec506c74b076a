//! Faucet configuration

use crate::captcha::DEFAULT_VERIFY_URL;
use crate::error::{FaucetError, FaucetResult};
use crate::ratelimit::RateLimitConfig;
use crate::token::{default_tokens, Token};
use crate::transaction::GasLimits;
use crate::watcher::WatcherConfig;
use drip_common::utils::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where rate-limit counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    Memory,
    Sled,
}

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,

    /// Hot wallet private key, hex
    pub private_key: String,

    pub captcha_enabled: bool,
    pub captcha_secret: String,
    pub captcha_verify_url: String,

    /// Database path
    pub db_path: String,

    pub kv_backend: KvBackend,

    pub gas_limit_native: u64,
    pub gas_limit_token: u64,

    pub confirmation_poll_interval_secs: u64,
    pub confirmation_max_attempts: u32,

    /// Requests per source address per window
    pub ip_daily_limit: u32,
    /// Requests per device fingerprint per window
    pub fingerprint_daily_limit: u32,
    pub rate_limit_window_secs: u64,
    /// Admit with increment-then-compare instead of check then record
    pub strict_rate_limiting: bool,

    /// Service-wide throttle ahead of all per-subject checks
    pub global_requests_per_minute: u32,

    pub token_cache_ttl_secs: u64,

    /// Drip records older than this are pruned daily
    pub record_retention_days: i64,

    pub cors_enabled: bool,
    pub metrics_enabled: bool,

    /// Seeded into the token registry on startup; existing ids are kept
    pub tokens: Vec<Token>,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8080".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            private_key: String::new(),
            captcha_enabled: true,
            captcha_secret: String::new(),
            captcha_verify_url: DEFAULT_VERIFY_URL.to_string(),
            db_path: "./faucet_data".to_string(),
            kv_backend: KvBackend::Sled,
            gas_limit_native: GasLimits::default().native,
            gas_limit_token: GasLimits::default().token,
            confirmation_poll_interval_secs: 5,
            confirmation_max_attempts: 60,
            ip_daily_limit: 3,
            fingerprint_daily_limit: 2,
            rate_limit_window_secs: 86_400,
            strict_rate_limiting: false,
            global_requests_per_minute: 60,
            token_cache_ttl_secs: 30,
            record_retention_days: 30,
            cors_enabled: true,
            metrics_enabled: true,
            tokens: default_tokens(),
            logging: LoggingConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

fn env_string(names: &[&str], target: &mut String) {
    if let Some(value) = names.iter().find_map(|name| std::env::var(name).ok()) {
        *target = value;
    }
}

impl FaucetConfig {
    /// Overlay environment variables onto an existing configuration.
    pub fn apply_env(&mut self) {
        env_string(&["FAUCET_SERVER_ADDR"], &mut self.server_addr);
        if let Ok(port) = std::env::var("PORT") {
            self.server_addr = format!("0.0.0.0:{}", port);
        }

        env_string(&["FAUCET_RPC_URL", "RPC_URL"], &mut self.rpc_url);
        env_string(&["FAUCET_PRIVATE_KEY"], &mut self.private_key);
        env_string(&["FAUCET_CAPTCHA_SECRET", "GOTCHA_SECRET_KEY"], &mut self.captcha_secret);
        env_string(&["FAUCET_CAPTCHA_VERIFY_URL", "GOTCHA_VERIFY_URL"], &mut self.captcha_verify_url);
        env_string(&["FAUCET_DB_PATH"], &mut self.db_path);

        if let Ok(enabled) = std::env::var("FAUCET_CAPTCHA_ENABLED") {
            self.captcha_enabled = enabled.to_lowercase() == "true";
        }

        if let Ok(enabled) = std::env::var("FAUCET_STRICT_RATE_LIMITING") {
            self.strict_rate_limiting = enabled.to_lowercase() == "true";
        }

        if let Ok(backend) = std::env::var("FAUCET_KV_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.kv_backend = KvBackend::Memory,
                "sled" => self.kv_backend = KvBackend::Sled,
                _ => {}
            }
        }

        env_parse("FAUCET_GAS_LIMIT_NATIVE", &mut self.gas_limit_native);
        env_parse("FAUCET_GAS_LIMIT_TOKEN", &mut self.gas_limit_token);
        env_parse("FAUCET_IP_DAILY_LIMIT", &mut self.ip_daily_limit);
        env_parse("FAUCET_FINGERPRINT_DAILY_LIMIT", &mut self.fingerprint_daily_limit);
        env_parse("FAUCET_RATE_LIMIT_WINDOW", &mut self.rate_limit_window_secs);
        env_parse("FAUCET_GLOBAL_RPM", &mut self.global_requests_per_minute);
        env_parse("FAUCET_CONFIRMATION_POLL_SECS", &mut self.confirmation_poll_interval_secs);
        env_parse("FAUCET_CONFIRMATION_MAX_ATTEMPTS", &mut self.confirmation_max_attempts);
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> FaucetResult<()> {
        if self.private_key.trim().is_empty() {
            return Err(FaucetError::ConfigError("private key is not set".to_string()));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(FaucetError::ConfigError("RPC URL is not set".to_string()));
        }
        if self.captcha_enabled && self.captcha_secret.is_empty() {
            return Err(FaucetError::ConfigError(
                "captcha is enabled but no secret is configured".to_string(),
            ));
        }
        if self.global_requests_per_minute == 0 {
            return Err(FaucetError::ConfigError(
                "global_requests_per_minute must be positive".to_string(),
            ));
        }
        if self.confirmation_max_attempts == 0 {
            return Err(FaucetError::ConfigError(
                "confirmation_max_attempts must be positive".to_string(),
            ));
        }
        for token in &self.tokens {
            token.transfer_kind()?;
            token.drip_amount_units()?;
        }
        Ok(())
    }

    pub fn gas_limits(&self) -> GasLimits {
        GasLimits {
            native: self.gas_limit_native,
            token: self.gas_limit_token,
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval: Duration::from_secs(self.confirmation_poll_interval_secs),
            max_attempts: self.confirmation_max_attempts,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            ip_daily_limit: self.ip_daily_limit,
            fingerprint_daily_limit: self.fingerprint_daily_limit,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn token_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_limits() {
        let config = FaucetConfig::default();
        assert_eq!(config.rate_limit_config(), RateLimitConfig::default());
        assert_eq!(config.gas_limits().native, 21_000);
        assert_eq!(config.gas_limits().token, 100_000);
        assert_eq!(config.watcher_config().max_attempts, 60);
        assert_eq!(config.tokens.len(), 5);
    }

    #[test]
    fn test_validate() {
        let mut config = FaucetConfig::default();
        assert!(matches!(config.validate(), Err(FaucetError::ConfigError(_))));

        config.private_key = "0x01".to_string();
        config.captcha_secret = "secret".to_string();
        config.validate().unwrap();

        config.tokens[0].drip_amount = "0.0000000000000000001".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "rpc_url = \"http://node:8545\"\nkv_backend = \"memory\"\nip_daily_limit = 5\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config: FaucetConfig = drip_common::utils::config::load_config(file.path()).unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.kv_backend, KvBackend::Memory);
        assert_eq!(config.ip_daily_limit, 5);
        assert_eq!(config.fingerprint_daily_limit, 2);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.tokens.len(), 5);
    }
}
