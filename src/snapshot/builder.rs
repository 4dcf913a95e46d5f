//! §4.6 Snapshot Builder — prices, formats, and orders a [`RawBalance`] set
//! into the canonical [`WalletSnapshot`].

use alloy::primitives::Address;
use sqlx::PgPool;

use crate::cache::store as cache_store;
use crate::chain_profile::ChainProfile;
use crate::config::DiscoveryConfig;
use crate::discovery::pipeline;
use crate::price::oracle::PriceOracle;
use crate::provider::pool::ProviderPool;
use crate::snapshot::types::{format_balance, RawBalance, TokenBalance, WalletSnapshot};

/// Orchestrates one full refresh: §4.5 discovery, §4.6 pricing/formatting,
/// then persists the result via §4.7. Used by both the on-demand (cache
/// miss) path and the periodic tracked-wallet refresher.
pub async fn refresh_wallet(
    db: &PgPool,
    provider_pool: &ProviderPool,
    profile: &ChainProfile,
    discovery_cfg: &DiscoveryConfig,
    oracle: &dyn PriceOracle,
    wallet: Address,
    refresh: bool,
) -> eyre::Result<WalletSnapshot> {
    let wallet_str = format!("{:#x}", wallet);
    cache_store::mark_syncing(db, profile.id, &wallet_str, true).await.ok();

    let last_scanned = cache_store::last_scanned_block(db, profile.id, &wallet_str).await?;
    let outcome = pipeline::discover(db, provider_pool, profile, discovery_cfg, wallet, last_scanned, refresh).await?;

    let snapshot = build(profile, oracle, outcome.balances, outcome.block_number, false).await;

    cache_store::store(db, profile.id, &wallet_str, &snapshot, outcome.scanned_to_block, false).await?;
    Ok(snapshot)
}

/// Assemble the final snapshot. Prices are fetched in one batched call to
/// `oracle`; tokens the oracle has no price for are valued at zero rather
/// than dropped, so Phase 1/2 discovery is never silently hidden.
pub async fn build(
    profile: &ChainProfile,
    oracle: &dyn PriceOracle,
    balances: Vec<RawBalance>,
    block_number: u64,
    syncing: bool,
) -> WalletSnapshot {
    let addresses: Vec<_> = balances.iter().map(|b| b.token_address).collect();
    let prices = oracle.prices(profile.id, &addresses).await;

    let mut result: Vec<TokenBalance> = balances
        .into_iter()
        .map(|b| {
            let usd_price = prices.get(&b.token_address).copied().unwrap_or(0.0);
            let formatted = format_balance(&b.balance, b.decimals);
            let usd_value = formatted.parse::<f64>().unwrap_or(0.0) * usd_price;
            TokenBalance {
                token_address: format!("{:#x}", b.token_address),
                symbol: b.symbol,
                name: b.name,
                decimals: b.decimals,
                balance: b.balance.to_string(),
                balance_formatted: formatted,
                native_token: b.native_token,
                usd_price,
                usd_value,
                portfolio_percentage: 0.0,
                possible_spam: b.possible_spam,
            }
        })
        .collect();

    // Denominator excludes possible-spam tokens so a wash-traded shitcoin
    // can't dominate the percentage split.
    let denom: f64 = result.iter().filter(|t| !t.possible_spam).map(|t| t.usd_value).sum();
    if denom > 0.0 {
        for token in result.iter_mut() {
            if !token.possible_spam {
                token.portfolio_percentage = (token.usd_value / denom) * 100.0;
            }
        }
    }

    sort_balances(&mut result);

    let native = result
        .iter()
        .find(|t| t.native_token)
        .map(|t| t.balance_formatted.clone())
        .unwrap_or_else(|| "0".to_string());

    WalletSnapshot {
        chain_id: profile.id,
        chain_name: profile.name.clone(),
        native,
        count: result.len(),
        result,
        block_number,
        syncing,
    }
}

/// §3 ordering: native coin first, then descending `usd_value`, ties broken
/// by symbol ascending.
fn sort_balances(balances: &mut [TokenBalance]) {
    balances.sort_by(|a, b| {
        b.native_token
            .cmp(&a.native_token)
            .then(b.usd_value.partial_cmp(&a.usd_value).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.symbol.cmp(&b.symbol))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(symbol: &str, usd_value: f64, native: bool, spam: bool) -> TokenBalance {
        TokenBalance {
            token_address: "0x0".to_string(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            balance: "0".to_string(),
            balance_formatted: "0".to_string(),
            native_token: native,
            usd_price: 1.0,
            usd_value,
            portfolio_percentage: 0.0,
            possible_spam: spam,
        }
    }

    #[test]
    fn native_sorts_first_then_usd_value_descending() {
        let mut balances = vec![token("AAA", 50.0, false, false), token("ETH", 1.0, true, false), token("BBB", 100.0, false, false)];
        sort_balances(&mut balances);
        assert_eq!(balances[0].symbol, "ETH");
        assert_eq!(balances[1].symbol, "BBB");
        assert_eq!(balances[2].symbol, "AAA");
    }

    #[test]
    fn ties_break_by_symbol_ascending() {
        let mut balances = vec![token("ZZZ", 10.0, false, false), token("AAA", 10.0, false, false)];
        sort_balances(&mut balances);
        assert_eq!(balances[0].symbol, "AAA");
    }
}
