//! §4.7 Cache & Single-Flight — persisted snapshot cache with freshness
//! classification and in-memory request deduplication.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::CacheConfig;
use crate::snapshot::types::WalletSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
    Missing,
}

pub struct CacheEntry {
    pub snapshot: WalletSnapshot,
    pub last_updated: DateTime<Utc>,
    pub syncing: bool,
}

/// Classify a cache row's age against the TTL/hard-expiry boundary, §4.7.
pub fn classify(last_updated: DateTime<Utc>, cfg: &CacheConfig) -> Freshness {
    let age = (Utc::now() - last_updated).num_seconds().max(0) as u64;
    if age < cfg.ttl_secs {
        Freshness::Fresh
    } else if age < cfg.hard_expiry_secs {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

pub async fn load(pool: &PgPool, chain_id: u64, wallet: &str) -> eyre::Result<Option<CacheEntry>> {
    let row: Option<(Value, DateTime<Utc>, bool, Option<i64>)> = sqlx::query_as(
        "SELECT snapshot, last_updated, syncing, last_scanned_block
         FROM wallet_cache WHERE chain_id = $1 AND wallet_address = $2",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some((snapshot_json, last_updated, syncing, _last_scanned_block)) => {
            let snapshot: WalletSnapshot = serde_json::from_value(snapshot_json)?;
            Some(CacheEntry { snapshot, last_updated, syncing })
        }
        None => None,
    })
}

pub async fn last_scanned_block(pool: &PgPool, chain_id: u64, wallet: &str) -> eyre::Result<Option<u64>> {
    let row: Option<(Option<i64>,)> = sqlx::query_as(
        "SELECT last_scanned_block FROM wallet_cache WHERE chain_id = $1 AND wallet_address = $2",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|(b,)| b).map(|b| b as u64))
}

/// Upsert the cache row. `syncing` marks whether a background build is in
/// flight for this (chain, wallet) so concurrent readers know to expect a
/// still-building row rather than a failed one.
pub async fn store(
    pool: &PgPool,
    chain_id: u64,
    wallet: &str,
    snapshot: &WalletSnapshot,
    scanned_to_block: Option<u64>,
    syncing: bool,
) -> eyre::Result<()> {
    let snapshot_json = serde_json::to_value(snapshot)?;
    sqlx::query(
        "INSERT INTO wallet_cache (chain_id, wallet_address, snapshot, last_updated, syncing, last_scanned_block)
         VALUES ($1, $2, $3, NOW(), $4, $5)
         ON CONFLICT (chain_id, wallet_address) DO UPDATE SET
           snapshot = EXCLUDED.snapshot,
           last_updated = EXCLUDED.last_updated,
           syncing = EXCLUDED.syncing,
           last_scanned_block = COALESCE(EXCLUDED.last_scanned_block, wallet_cache.last_scanned_block)",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .bind(snapshot_json)
    .bind(syncing)
    .bind(scanned_to_block.map(|b| b as i64))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_syncing(pool: &PgPool, chain_id: u64, wallet: &str, syncing: bool) -> eyre::Result<()> {
    sqlx::query("UPDATE wallet_cache SET syncing = $3 WHERE chain_id = $1 AND wallet_address = $2")
        .bind(chain_id as i64)
        .bind(wallet)
        .bind(syncing)
        .execute(pool)
        .await?;
    Ok(())
}

/// Force a refresh on the next read by clearing `last_updated`, used by the
/// Head Scanner when it sees chain activity touch a tracked wallet.
pub async fn invalidate(pool: &PgPool, chain_id: u64, wallet: &str) -> eyre::Result<()> {
    sqlx::query(
        "UPDATE wallet_cache SET last_updated = TO_TIMESTAMP(0) WHERE chain_id = $1 AND wallet_address = $2",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .execute(pool)
    .await?;
    Ok(())
}

/// Rows whose `syncing` flag has been set longer than `stuck_threshold_secs`
/// — a build task that crashed or was killed without clearing the flag.
pub async fn stuck_syncing_wallets(pool: &PgPool, cfg: &CacheConfig) -> eyre::Result<Vec<(i64, String)>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chain_id, wallet_address FROM wallet_cache
         WHERE syncing = true AND last_updated < NOW() - make_interval(secs => $1)",
    )
    .bind(cfg.stuck_threshold_secs as f64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Hard-expired rows eligible for eviction. A tracked wallet's row is never
/// included even if `last_updated` looks expired (the Head Scanner resets it
/// to the epoch on invalidation) — the Refresher owns tracked wallets and
/// will rebuild them on its own schedule.
pub async fn expired_rows(pool: &PgPool, cfg: &CacheConfig) -> eyre::Result<Vec<(i64, String)>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT chain_id, wallet_address FROM wallet_cache
         WHERE last_updated < NOW() - make_interval(secs => $1)
           AND NOT EXISTS (
             SELECT 1 FROM tracked_wallets tw
             WHERE tw.chain_id = wallet_cache.chain_id AND tw.wallet_address = wallet_cache.wallet_address
           )",
    )
    .bind(cfg.hard_expiry_secs as f64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete(pool: &PgPool, chain_id: i64, wallet: &str) -> eyre::Result<()> {
    sqlx::query("DELETE FROM wallet_cache WHERE chain_id = $1 AND wallet_address = $2")
        .bind(chain_id)
        .bind(wallet)
        .execute(pool)
        .await?;
    Ok(())
}

/// Single-flight map: concurrent requests for the same (chain, wallet) share
/// the result of one in-flight build rather than each running their own.
/// The first caller to reach a key installs a fresh [`OnceCell`] and runs
/// `build`; every other caller for the same key awaits that same cell and
/// receives a clone of the value it resolves to — `build` runs exactly once
/// per flight, no matter how many callers join it.
#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<(u64, String), Arc<OnceCell<Result<WalletSnapshot, String>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` so that only one caller per key executes it; joiners
    /// receive a clone of the same result instead of re-running `build`.
    pub async fn run<F, Fut>(&self, chain_id: u64, wallet: &str, build: F) -> eyre::Result<WalletSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = eyre::Result<WalletSnapshot>>,
    {
        let key = (chain_id, wallet.to_string());
        let cell = self.inflight.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone();

        let result = cell
            .get_or_init(|| async move { build().await.map_err(|e| e.to_string()) })
            .await
            .clone();

        // Only the last holder still referencing this Arc removes it from
        // the map; an Arc::strong_count of 2 means map + this clone.
        if Arc::strong_count(&cell) <= 2 {
            self.inflight.remove(&key);
        }

        result.map_err(|e| eyre::eyre!(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn cfg() -> CacheConfig {
        CacheConfig { ttl_secs: 60, hard_expiry_secs: 1800, stuck_threshold_secs: 300, sweep_interval_secs: 600, build_timeout_secs: 90 }
    }

    #[test]
    fn classifies_fresh_stale_expired() {
        let c = cfg();
        assert_eq!(classify(Utc::now(), &c), Freshness::Fresh);
        assert_eq!(classify(Utc::now() - ChronoDuration::seconds(120), &c), Freshness::Stale);
        assert_eq!(classify(Utc::now() - ChronoDuration::seconds(3600), &c), Freshness::Expired);
    }

    #[tokio::test]
    async fn single_flight_runs_closure_once_per_call() {
        let sf = SingleFlight::new();
        let result = sf.run(1, "0xabc", || async { Ok(snapshot(7)) }).await.unwrap();
        assert_eq!(result.block_number, 7);
        assert!(sf.inflight.is_empty());
    }

    fn snapshot(block_number: u64) -> WalletSnapshot {
        WalletSnapshot {
            chain_id: 1,
            chain_name: "test".to_string(),
            native: "0".to_string(),
            result: Vec::new(),
            block_number,
            syncing: false,
            count: 0,
        }
    }

    /// Twenty concurrent joiners on the same key must observe exactly one
    /// `build` invocation, each receiving a clone of its result.
    #[tokio::test]
    async fn single_flight_shares_one_build_across_concurrent_joiners() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let sf = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(20));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let sf = sf.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                sf.run(1, "0xabc", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(snapshot(42))
                })
                .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.block_number, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sf.inflight.is_empty());
    }
}
