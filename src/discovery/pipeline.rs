//! §4.5 Discovery Pipeline — orchestrates Phase 1 (known-token sweep) and
//! Phase 2 (log-crawl discovery) into the candidate non-zero balance set.

use alloy::primitives::{Address, U256};
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;

use crate::chain_profile::{native_token_address, ChainProfile};
use crate::config::DiscoveryConfig;
use crate::discovery::log_crawler;
use crate::provider::pool::ProviderPool;
use crate::snapshot::types::RawBalance;
use crate::tokens::multicall::{self, CallOutcome, CallRequest};
use crate::tokens::registry;

pub struct DiscoveryOutcome {
    pub balances: Vec<RawBalance>,
    pub block_number: u64,
    pub deep_scan_ran: bool,
    pub scanned_to_block: Option<u64>,
}

/// Run the full two-phase pipeline for one (chain, wallet).
pub async fn discover(
    db: &PgPool,
    provider_pool: &ProviderPool,
    profile: &ChainProfile,
    cfg: &DiscoveryConfig,
    wallet: Address,
    last_scanned_block: Option<u64>,
    refresh: bool,
) -> eyre::Result<DiscoveryOutcome> {
    let block_number = provider_pool.block_number().await?;

    let mut balances = phase1(db, provider_pool, profile, wallet).await?;
    let non_native_count = balances.iter().filter(|b| !b.native_token).count();

    let mut deep_scan_ran = false;
    let mut scanned_to_block = None;

    if non_native_count < cfg.phase2_min_tokens || refresh {
        let from_block = last_scanned_block
            .map(|b| b + 1)
            .unwrap_or(profile.discovery_start_block)
            .max(profile.discovery_start_block);

        if from_block <= block_number {
            let phase2_balances =
                phase2(db, provider_pool, profile, cfg, wallet, from_block, block_number).await?;
            merge_unique(&mut balances, phase2_balances);
            deep_scan_ran = true;
        }
        scanned_to_block = Some(block_number);
    }

    Ok(DiscoveryOutcome {
        balances,
        block_number,
        deep_scan_ran,
        scanned_to_block,
    })
}

/// Phase 1 — sweep every verified token plus the native coin via multicall,
/// keep only non-zero balances.
async fn phase1(
    db: &PgPool,
    provider_pool: &ProviderPool,
    profile: &ChainProfile,
    wallet: Address,
) -> eyre::Result<Vec<RawBalance>> {
    let verified = registry::list_verified(db, profile.id).await?;

    // Parse addresses up front so `requests` and the tokens we zip outcomes
    // against are built from the exact same filtered sequence — a token
    // whose stored address fails to parse is dropped from both, never just
    // one, so balance results stay aligned with their token.
    let parsed: Vec<(Address, &crate::tokens::types::TokenMeta)> = verified
        .iter()
        .filter_map(|t| Address::from_str(&t.address).ok().map(|addr| (addr, t)))
        .collect();

    let requests: Vec<CallRequest> = parsed
        .iter()
        .map(|(addr, _)| CallRequest { target: *addr, call_data: multicall::balance_of_call(wallet) })
        .collect();

    let outcomes = multicall::execute_batch(provider_pool, profile.multicall_address, &requests).await;

    let mut balances = Vec::new();
    for ((addr, token), outcome) in parsed.into_iter().zip(outcomes.into_iter()) {
        let CallOutcome::Success(data) = outcome else { continue };
        let Some(raw) = multicall::decode_balance(&data) else { continue };
        if raw.is_zero() {
            continue;
        }
        balances.push(RawBalance {
            token_address: addr,
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals,
            balance: u256_to_decimal(raw),
            native_token: false,
            possible_spam: token.possible_spam,
        });
    }

    let native_balance = provider_pool.get_balance(wallet).await.unwrap_or(U256::ZERO);
    balances.push(RawBalance {
        token_address: native_token_address(),
        symbol: profile.native_symbol.clone(),
        name: profile.native_symbol.clone(),
        decimals: 18,
        balance: u256_to_decimal(native_balance),
        native_token: true,
        possible_spam: false,
    });

    Ok(balances)
}

/// Phase 2 — crawl `Transfer` logs in `[from_block, to_block]`, register any
/// newly-seen token, and sweep non-zero balances for the discovered set.
async fn phase2(
    db: &PgPool,
    provider_pool: &ProviderPool,
    profile: &ChainProfile,
    cfg: &DiscoveryConfig,
    wallet: Address,
    from_block: u64,
    to_block: u64,
) -> eyre::Result<Vec<RawBalance>> {
    let depth = log_crawler::max_depth(from_block, to_block);
    let discovered = log_crawler::discover_token_addresses(provider_pool, wallet, from_block, to_block, cfg.soft_log_cap)
        .await
        .map_err(|e| eyre::eyre!(e))?;
    let _ = depth;

    let mut new_tokens = Vec::with_capacity(discovered.len());
    for addr in discovered {
        match registry::upsert_discovered(db, profile, provider_pool, addr).await {
            Ok(meta) => new_tokens.push(meta),
            Err(e) => tracing::warn!(chain = %profile.name, address = %addr, error = %e, "failed to register discovered token"),
        }
    }

    let parsed: Vec<(Address, &crate::tokens::types::TokenMeta)> = new_tokens
        .iter()
        .filter_map(|t| Address::from_str(&t.address).ok().map(|addr| (addr, t)))
        .collect();

    let requests: Vec<CallRequest> = parsed
        .iter()
        .map(|(addr, _)| CallRequest { target: *addr, call_data: multicall::balance_of_call(wallet) })
        .collect();

    let outcomes = multicall::execute_batch(provider_pool, profile.multicall_address, &requests).await;

    let mut balances = Vec::new();
    for ((addr, token), outcome) in parsed.into_iter().zip(outcomes.into_iter()) {
        let CallOutcome::Success(data) = outcome else { continue };
        let Some(raw) = multicall::decode_balance(&data) else { continue };
        if raw.is_zero() {
            continue;
        }
        balances.push(RawBalance {
            token_address: addr,
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals,
            balance: u256_to_decimal(raw),
            native_token: false,
            possible_spam: token.possible_spam,
        });
    }

    Ok(balances)
}

fn merge_unique(existing: &mut Vec<RawBalance>, additions: Vec<RawBalance>) {
    for addition in additions {
        if !existing.iter().any(|b| b.token_address == addition.token_address) {
            existing.push(addition);
        }
    }
}

fn u256_to_decimal(value: U256) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unique_skips_duplicate_tokens() {
        let token = native_token_address();
        let mut existing = vec![RawBalance {
            token_address: token,
            symbol: "A".into(),
            name: "A".into(),
            decimals: 18,
            balance: BigDecimal::from(1),
            native_token: false,
            possible_spam: false,
        }];
        let additions = vec![RawBalance {
            token_address: token,
            symbol: "A-dup".into(),
            name: "A-dup".into(),
            decimals: 18,
            balance: BigDecimal::from(2),
            native_token: false,
            possible_spam: false,
        }];
        merge_unique(&mut existing, additions);
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].symbol, "A");
    }
}
