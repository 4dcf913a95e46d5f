//! §3 DATA MODEL — `ChainId` / `ChainProfile` / canonical `Address` handling.

use alloy::primitives::Address;
use std::str::FromStr;

use crate::config::ChainConfig;
use crate::error::AppError;

pub type ChainId = u64;

/// The reserved sentinel address used to represent the chain's native coin
/// (ETH, BNB, ...) as if it were an ERC-20 token.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

pub fn native_token_address() -> Address {
    Address::from_str(NATIVE_TOKEN_ADDRESS).expect("native sentinel is a valid address")
}

/// Static, per-chain configuration resolved once at startup from
/// [`ChainConfig`]. Held behind an `Arc` and shared by every task that
/// touches this chain (provider pool, discovery pipeline, head scanner).
#[derive(Debug, Clone)]
pub struct ChainProfile {
    pub id: ChainId,
    pub name: String,
    pub native_symbol: String,
    pub rpc_endpoints: Vec<String>,
    pub multicall_address: Address,
    pub log_chunk_size: u64,
    pub scanner_concurrency: usize,
    pub discovery_start_block: u64,
    pub explorer_api_url: Option<String>,
}

impl ChainProfile {
    pub fn from_config(cfg: &ChainConfig) -> eyre::Result<Self> {
        let multicall_address = Address::from_str(&cfg.multicall_address)
            .map_err(|e| eyre::eyre!("invalid multicall address for chain '{}': {}", cfg.name, e))?;

        if cfg.rpc_endpoints.is_empty() {
            return Err(eyre::eyre!("chain '{}' has no RPC endpoints configured", cfg.name));
        }

        Ok(Self {
            id: cfg.chain_id,
            name: cfg.name.clone(),
            native_symbol: cfg.native_symbol.clone(),
            rpc_endpoints: cfg.rpc_endpoints.clone(),
            multicall_address,
            log_chunk_size: cfg.log_chunk_size,
            scanner_concurrency: cfg.scanner_concurrency,
            discovery_start_block: cfg.discovery_start_block.unwrap_or(0),
            explorer_api_url: cfg.explorer_api_url.clone(),
        })
    }
}

/// Canonicalize a user-supplied address string to lowercase `0x`-prefixed
/// hex, accepting checksummed input. Used at every API boundary that takes
/// an address path/query parameter.
pub fn canonicalize_address(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    if trimmed.len() != 40 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidInput(format!("'{raw}' is not a valid address")));
    }
    Ok(format!("0x{}", trimmed.to_lowercase()))
}

pub fn parse_address(raw: &str) -> Result<Address, AppError> {
    let canonical = canonicalize_address(raw)?;
    Address::from_str(&canonical).map_err(|e| AppError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_checksummed_address() {
        let mixed = "0xAbC1230000000000000000000000000000000A";
        let canon = canonicalize_address(mixed).unwrap();
        assert_eq!(canon, "0xabc1230000000000000000000000000000000a");
    }

    #[test]
    fn rejects_short_address() {
        assert!(canonicalize_address("0x1234").is_err());
    }

    #[test]
    fn accepts_address_without_0x_prefix() {
        let canon = canonicalize_address("abc1230000000000000000000000000000000a").unwrap();
        assert_eq!(canon, "0xabc1230000000000000000000000000000000a");
    }

    #[test]
    fn native_sentinel_parses() {
        assert_eq!(
            native_token_address().to_string().to_lowercase(),
            NATIVE_TOKEN_ADDRESS
        );
    }
}
