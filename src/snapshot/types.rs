//! `TokenBalance` / `WalletSnapshot`, §3 — the canonical read-model.

use bigdecimal::BigDecimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TokenBalance {
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: i16,
    /// Raw on-chain balance as a decimal string (arbitrary precision).
    pub balance: String,
    /// `balance / 10^decimals`, exactly.
    pub balance_formatted: String,
    pub native_token: bool,
    pub usd_price: f64,
    pub usd_value: f64,
    pub portfolio_percentage: f64,
    pub possible_spam: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSnapshot {
    pub chain_id: u64,
    pub chain_name: String,
    pub native: String,
    pub result: Vec<TokenBalance>,
    pub block_number: u64,
    pub syncing: bool,
    pub count: usize,
}

impl WalletSnapshot {
    pub fn empty(chain_id: u64, chain_name: &str, block_number: u64) -> Self {
        Self {
            chain_id,
            chain_name: chain_name.to_string(),
            native: "0".to_string(),
            result: Vec::new(),
            block_number,
            syncing: true,
            count: 0,
        }
    }
}

/// Raw, pre-price balance discovered by §4.5. Produced by Phase 1 and
/// Phase 2, consumed by the Snapshot Builder.
#[derive(Debug, Clone)]
pub struct RawBalance {
    pub token_address: alloy::primitives::Address,
    pub symbol: String,
    pub name: String,
    pub decimals: i16,
    pub balance: BigDecimal,
    pub native_token: bool,
    pub possible_spam: bool,
}

fn pow10(decimals: i16) -> BigDecimal {
    let digits = "1".to_string() + &"0".repeat(decimals.max(0) as usize);
    digits.parse().expect("power-of-ten literal always parses")
}

/// Format a raw integer balance (as a decimal string) to its fixed-point
/// representation given `decimals`. `balance_formatted * 10^decimals ==
/// balance` holds exactly because both sides are computed from the same
/// [`BigDecimal`] with no intermediate float.
pub fn format_balance(raw: &BigDecimal, decimals: i16) -> String {
    (raw / pow10(decimals)).normalized().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn formats_balance_with_decimals() {
        let raw = BigDecimal::from_str("1500000").unwrap();
        assert_eq!(format_balance(&raw, 6), "1.5");
    }

    #[test]
    fn formats_zero_decimals_unchanged() {
        let raw = BigDecimal::from_str("42").unwrap();
        assert_eq!(format_balance(&raw, 0), "42");
    }
}
