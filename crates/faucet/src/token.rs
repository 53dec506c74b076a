//! Token registry: the set of assets the faucet can dispense.

use crate::amount::parse_units;
use crate::database::FaucetDatabase;
use crate::error::{FaucetError, FaucetResult};
use crate::transaction::TransferKind;
use moka::future::Cache;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One dispensable token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub name: String,
    pub symbol: String,
    /// ERC20 contract address; empty for the native coin
    #[serde(default)]
    pub address: String,
    /// Human amount per drip, e.g. "0.5"
    pub drip_amount: String,
    pub cooldown_hours: u64,
    pub decimals: u32,
    #[serde(default)]
    pub logo_url: String,
    pub is_active: bool,
}

impl Token {
    pub fn is_native(&self) -> bool {
        self.address.trim().is_empty()
    }

    pub fn transfer_kind(&self) -> FaucetResult<TransferKind> {
        TransferKind::from_contract(&self.address)
    }

    /// Drip amount in smallest units.
    pub fn drip_amount_units(&self) -> FaucetResult<BigUint> {
        parse_units(&self.drip_amount, self.decimals)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_hours * 3600)
    }
}

/// Tokens seeded into an empty registry.
pub fn default_tokens() -> Vec<Token> {
    let token = |id: &str, name: &str, symbol: &str, address: &str, amount: &str, decimals: u32, logo: &str| Token {
        id: id.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        address: address.to_string(),
        drip_amount: amount.to_string(),
        cooldown_hours: 24,
        decimals,
        logo_url: logo.to_string(),
        is_active: true,
    };

    vec![
        token("eth", "Ethereum", "ETH", "", "0.5", 18,
            "https://cryptologos.cc/logos/ethereum-eth-logo.svg"),
        // Sepolia USDC
        token("usdc", "USD Coin", "USDC", "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238", "100", 6,
            "https://cryptologos.cc/logos/usd-coin-usdc-logo.svg"),
        token("usdt", "Tether USD", "USDT", "0xaA8E23Fb1079EA71e0a56F48a2aA51851D8433D0", "100", 6,
            "https://cryptologos.cc/logos/tether-usdt-logo.svg"),
        token("dai", "Dai Stablecoin", "DAI", "0x68194a729C2450ad26072b3D33ADaCbcef39D574", "100", 18,
            "https://cryptologos.cc/logos/multi-collateral-dai-dai-logo.svg"),
        // Sepolia LINK
        token("link", "Chainlink", "LINK", "0x779877A7B0D9E8603169DdbD7836e478b4624789", "10", 18,
            "https://cryptologos.cc/logos/chainlink-link-logo.svg"),
    ]
}

/// Read path over the token tree with a short-lived cache in front.
pub struct TokenRegistry {
    database: Arc<FaucetDatabase>,
    cache: Cache<String, Token>,
}

impl TokenRegistry {
    pub fn new(database: Arc<FaucetDatabase>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(cache_ttl)
            .build();
        Self { database, cache }
    }

    /// Active token by id. Missing and inactive tokens are both rejected.
    pub async fn get_active(&self, id: &str) -> FaucetResult<Token> {
        let token = match self.cache.get(id).await {
            Some(token) => token,
            None => {
                let token = self
                    .database
                    .get_token(id)?
                    .ok_or_else(|| FaucetError::InvalidToken(id.to_string()))?;
                self.cache.insert(id.to_string(), token.clone()).await;
                debug!("Token {} loaded into cache", id);
                token
            }
        };

        if !token.is_active {
            return Err(FaucetError::InvalidToken(id.to_string()));
        }
        Ok(token)
    }

    pub fn list_active(&self) -> FaucetResult<Vec<Token>> {
        Ok(self
            .database
            .list_tokens()?
            .into_iter()
            .filter(|t| t.is_active)
            .collect())
    }
}
