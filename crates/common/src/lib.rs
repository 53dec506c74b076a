//! Shared types and ambient utilities for the drip faucet workspace.

pub mod types;
pub mod utils;

pub use types::{Address, Hash, ParseHexError, ADDRESS_LENGTH, HASH_LENGTH};
