//! §4.9 Head Scanner — per-chain poll loop that watches tracked wallets for
//! new activity, invalidates their cache entry, and records observed
//! transfers. Reorgs are handled by rolling `synced_block` back a fixed
//! depth rather than walking a stored block-hash chain: this scanner only
//! needs "did anything touch a tracked wallet", not a full canonical chain.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use sqlx::PgPool;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::store as cache_store;
use crate::chain_profile::ChainProfile;
use crate::config::DiscoveryConfig;
use crate::db::repository::{self, LogEntry};
use crate::discovery::log_crawler::Transfer;
use crate::provider::pool::ProviderPool;
use crate::tracked::registry;

const QUORUM: usize = 2;

pub async fn run(
    profile: Arc<ChainProfile>,
    cfg: Arc<DiscoveryConfig>,
    db: PgPool,
    provider_pool: Arc<ProviderPool>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(cfg.poll_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %profile.name, "head scanner stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        if let Err(e) = tick(&profile, &cfg, &db, &provider_pool).await {
            tracing::warn!(chain = %profile.name, error = %e, "head scanner tick failed");
        }
    }
}

async fn tick(
    profile: &ChainProfile,
    cfg: &DiscoveryConfig,
    db: &PgPool,
    provider_pool: &ProviderPool,
) -> eyre::Result<()> {
    let latest = provider_pool.block_number_quorum(QUORUM).await?;

    let synced = repository::get_synced_block(db, profile.id).await?;

    let synced = match synced {
        Some(s) if s > latest => {
            // Chain tip moved backwards: reorg. Roll back a fixed depth
            // rather than searching for the fork point.
            tracing::warn!(chain = %profile.name, synced = s, latest, "reorg detected, rolling back");
            latest.saturating_sub(cfg.reorg_depth)
        }
        Some(s) => s,
        None => latest.saturating_sub(cfg.reorg_depth),
    };

    if synced >= latest {
        return Ok(());
    }

    let to_block = (synced + cfg.max_catchup_blocks).min(latest);
    let wallets = registry::all_addresses(db, profile.id).await?;
    if wallets.is_empty() {
        repository::set_synced_block(db, profile.id, to_block).await?;
        return Ok(());
    }

    let wallet_addrs: HashSet<Address> = wallets.iter().filter_map(|w| Address::from_str(w).ok()).collect();
    let topics: Vec<B256> = wallet_addrs.iter().map(|a| B256::left_padding_from(a.as_slice())).collect();

    let from_filter = Filter::new().event_signature(Transfer::SIGNATURE_HASH).from_block(synced + 1).to_block(to_block).topic1(topics.clone());
    let to_filter = Filter::new().event_signature(Transfer::SIGNATURE_HASH).from_block(synced + 1).to_block(to_block).topic2(topics);

    let mut logs = provider_pool.get_logs(&from_filter).await.unwrap_or_default();
    logs.extend(provider_pool.get_logs(&to_filter).await.unwrap_or_default());

    let mut touched = HashSet::new();
    let mut transfer_entries = Vec::new();

    for log in &logs {
        let Ok(decoded) = Transfer::decode_log(&log.inner) else { continue };
        if wallet_addrs.contains(&decoded.from) {
            touched.insert(decoded.from);
        }
        if wallet_addrs.contains(&decoded.to) {
            touched.insert(decoded.to);
        }
        transfer_entries.push(decoded.value.to_string());
    }

    let entries: Vec<LogEntry> = logs
        .iter()
        .zip(transfer_entries.iter())
        .filter_map(|(log, amount)| {
            let decoded = Transfer::decode_log(&log.inner).ok()?;
            Some(LogEntry {
                tx_hash: log.transaction_hash.unwrap_or_default(),
                block_number: log.block_number.unwrap_or(0),
                log_index: log.log_index.unwrap_or(0),
                token_address: log.inner.address,
                from_address: decoded.from,
                to_address: decoded.to,
                amount,
            })
        })
        .collect();

    repository::insert_transfers_batch(db, profile.id, &entries).await?;

    for wallet in &touched {
        let wallet_str = format!("{:#x}", wallet);
        cache_store::invalidate(db, profile.id, &wallet_str).await.ok();
        tracing::info!(chain = %profile.name, wallet = %wallet_str, "cache invalidated by head scanner");
    }

    repository::set_synced_block(db, profile.id, to_block).await?;
    Ok(())
}
