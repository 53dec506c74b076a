//! Multi-token testnet faucet.
//!
//! Dispenses a native coin and ERC20 tokens from one hot wallet:
//! - Gap-free nonce allocation shared by concurrent requests
//! - Legacy EIP-155 transfers, native or `transfer(address,uint256)`
//! - Background confirmation tracking
//! - Per wallet+token cooldowns and per source / per device daily caps

pub mod amount;
pub mod api;
pub mod captcha;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod nonce;
pub mod ratelimit;
pub mod rpc;
pub mod service;
pub mod signer;
pub mod token;
pub mod transaction;
pub mod watcher;

pub use config::{FaucetConfig, KvBackend};
pub use database::{DripRecord, DripStatus, FaucetDatabase, FaucetStatistics};
pub use error::{FaucetError, FaucetResult};
pub use service::{DripAccepted, DripRequest, DripTicket, FaucetService};
pub use token::{Token, TokenRegistry};
