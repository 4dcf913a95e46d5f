//! §4.1 Provider Pool — per-chain RPC endpoints with health-aware failover
//! and an optional quorum mode.

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Log, TransactionRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::chain_profile::ChainProfile;
use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::provider::health::ProviderHealth;

struct ProviderEntry {
    provider: RootProvider,
    health: Arc<ProviderHealth>,
}

/// One pool per chain. Providers are held in the priority order given in
/// config; `call`-style methods walk that order, skipping unhealthy
/// endpoints, until one succeeds or the list is exhausted.
pub struct ProviderPool {
    chain_id: u64,
    entries: Vec<ProviderEntry>,
    timeout: Duration,
    unhealthy_threshold: u32,
    cooldown: Duration,
}

impl ProviderPool {
    pub fn connect(profile: &ChainProfile, cfg: &ProviderConfig) -> eyre::Result<Self> {
        let mut entries = Vec::with_capacity(profile.rpc_endpoints.len());
        for url in &profile.rpc_endpoints {
            let parsed = url
                .parse()
                .map_err(|e| eyre::eyre!("invalid RPC url '{}' for chain '{}': {}", url, profile.name, e))?;
            let provider = ProviderBuilder::new().connect_http(parsed);
            entries.push(ProviderEntry {
                provider,
                health: Arc::new(ProviderHealth::new(url.clone())),
            });
        }

        Ok(Self {
            chain_id: profile.id,
            entries,
            timeout: Duration::from_millis(cfg.timeout_ms),
            unhealthy_threshold: cfg.unhealthy_threshold,
            cooldown: Duration::from_secs(cfg.cooldown_secs),
        })
    }

    pub fn health_snapshot(&self) -> Vec<Arc<ProviderHealth>> {
        self.entries.iter().map(|e| e.health.clone()).collect()
    }

    async fn candidates(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            if e.health.is_candidate(self.cooldown).await {
                out.push(i);
            }
        }
        out
    }

    /// Run `op` against providers in priority order until one succeeds.
    async fn with_failover<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: for<'a> Fn(&'a RootProvider) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, String>> + Send + 'a>>,
    {
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            return Err(AppError::ProviderUnavailable(self.chain_id));
        }

        let mut last_err = None;
        for idx in &candidates {
            let entry = &self.entries[*idx];
            let started = std::time::Instant::now();
            let attempt = tokio::time::timeout(self.timeout, op(&entry.provider)).await;
            match attempt {
                Ok(Ok(value)) => {
                    entry.health.record_success(started.elapsed());
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    entry.health.record_failure(self.unhealthy_threshold).await;
                    tracing::warn!(chain_id = self.chain_id, url = %entry.health.url, error = %e, "RPC call failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    entry.health.record_failure(self.unhealthy_threshold).await;
                    tracing::warn!(chain_id = self.chain_id, url = %entry.health.url, "RPC call timed out");
                    last_err = Some("timeout".to_string());
                }
            }
        }

        tracing::error!(chain_id = self.chain_id, error = ?last_err, "all providers exhausted");
        Err(AppError::ProviderUnavailable(self.chain_id))
    }

    pub async fn block_number(&self) -> Result<u64, AppError> {
        self.with_failover(|p| {
            Box::pin(async move { p.get_block_number().await.map_err(|e| e.to_string()) })
        })
        .await
    }

    /// Issue `eth_blockNumber` to `quorum` distinct healthy providers and
    /// return the value a strict majority agree on.
    pub async fn block_number_quorum(&self, quorum: usize) -> Result<u64, AppError> {
        let candidates = self.candidates().await;
        if candidates.len() < quorum {
            return Err(AppError::ProviderUnavailable(self.chain_id));
        }

        let mut handles = Vec::new();
        for idx in candidates.into_iter().take(quorum.max(2)) {
            let entry = &self.entries[idx];
            let started = std::time::Instant::now();
            let result = tokio::time::timeout(self.timeout, entry.provider.get_block_number()).await;
            match result {
                Ok(Ok(n)) => {
                    entry.health.record_success(started.elapsed());
                    handles.push(n);
                }
                _ => {
                    entry.health.record_failure(self.unhealthy_threshold).await;
                }
            }
        }

        majority(&handles).ok_or(AppError::ProviderDisagreement)
    }

    pub async fn get_logs(&self, filter: &alloy::rpc::types::Filter) -> Result<Vec<Log>, AppError> {
        let filter = filter.clone();
        self.with_failover(move |p| {
            let filter = filter.clone();
            Box::pin(async move { p.get_logs(&filter).await.map_err(|e| e.to_string()) })
        })
        .await
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, AppError> {
        self.with_failover(move |p| {
            Box::pin(async move { p.get_balance(address).await.map_err(|e| e.to_string()) })
        })
        .await
    }

    pub async fn call(&self, tx: TransactionRequest) -> Result<Bytes, AppError> {
        self.with_failover(move |p| {
            let tx = tx.clone();
            Box::pin(async move { p.call(tx).await.map_err(|e| e.to_string()) })
        })
        .await
    }

    /// Background probe: issue a cheap `eth_blockNumber` against every
    /// unhealthy endpoint so it can rejoin the candidate set early.
    pub async fn probe_unhealthy(&self) {
        for entry in &self.entries {
            if entry.health.is_healthy() {
                continue;
            }
            let started = std::time::Instant::now();
            match tokio::time::timeout(self.timeout, entry.provider.get_block_number()).await {
                Ok(Ok(_)) => {
                    entry.health.restore();
                    tracing::info!(chain_id = self.chain_id, url = %entry.health.url, "provider probe succeeded, restoring health");
                    entry.health.record_success(started.elapsed());
                }
                _ => {
                    tracing::debug!(chain_id = self.chain_id, url = %entry.health.url, "provider probe still failing");
                }
            }
        }
    }
}

fn majority(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for v in values {
        *counts.entry(*v).or_insert(0) += 1;
    }
    let (value, count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
    if count * 2 > values.len() {
        Some(value)
    } else {
        None
    }
}

/// Pool registry keyed by chain id, constructed once at startup and handed
/// to every task as an explicit dependency (§9 design note: no implicit
/// global lookup).
pub struct ProviderRegistry {
    pools: HashMap<u64, Arc<ProviderPool>>,
}

impl ProviderRegistry {
    pub fn new(pools: HashMap<u64, Arc<ProviderPool>>) -> Self {
        Self { pools }
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<ProviderPool>, AppError> {
        self.pools
            .get(&chain_id)
            .cloned()
            .ok_or(AppError::UnsupportedChain(chain_id))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.pools.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_requires_strict_majority() {
        assert_eq!(majority(&[5, 5, 4]), Some(5));
        assert_eq!(majority(&[5, 4]), None);
        assert_eq!(majority(&[]), None);
    }

    #[test]
    fn majority_of_one_wins_trivially() {
        assert_eq!(majority(&[7]), Some(7));
    }
}
