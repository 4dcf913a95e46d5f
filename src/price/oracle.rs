//! USD pricing for the Snapshot Builder. Not named by a dedicated spec
//! section but required by §4.6; grounded on the risk-platform corpus's
//! `PriceOracle` trait shape, reworked with a TTL cache and stale fallback so
//! a flaky price API degrades snapshot freshness rather than availability.

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::chain_profile::native_token_address;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch USD prices for `addresses` on `chain_id` in one batched call.
    /// Addresses with no known price are simply absent from the result.
    async fn prices(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, f64>;
}

struct CachedPrice {
    value: f64,
    fetched_at: Instant,
}

/// Coingecko-backed oracle with a per-(chain, token) TTL cache. On request
/// failure the last known price is served regardless of age rather than
/// returning nothing, since a stale price beats a blank portfolio row.
pub struct CoingeckoPriceOracle {
    client: reqwest::Client,
    base_url: String,
    ttl: Duration,
    platforms: HashMap<u64, String>,
    native_coin_ids: HashMap<u64, String>,
    cache: DashMap<(u64, Address), CachedPrice>,
}

impl CoingeckoPriceOracle {
    pub fn new(
        ttl: Duration,
        platforms: HashMap<u64, String>,
        native_coin_ids: HashMap<u64, String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            ttl,
            platforms,
            native_coin_ids,
            cache: DashMap::new(),
        }
    }

    fn fresh(&self, chain_id: u64, address: Address) -> Option<f64> {
        self.cache.get(&(chain_id, address)).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.value)
            } else {
                None
            }
        })
    }

    fn stale(&self, chain_id: u64, address: Address) -> Option<f64> {
        self.cache.get(&(chain_id, address)).map(|entry| entry.value)
    }

    fn store(&self, chain_id: u64, address: Address, value: f64) {
        self.cache.insert((chain_id, address), CachedPrice { value, fetched_at: Instant::now() });
    }

    async fn fetch_native(&self, chain_id: u64) -> Option<f64> {
        let coin_id = self.native_coin_ids.get(&chain_id)?;
        let url = format!("{}/simple/price?ids={}&vs_currencies=usd", self.base_url, coin_id);
        let body: serde_json::Value = self.client.get(&url).send().await.ok()?.json().await.ok()?;
        body.get(coin_id)?.get("usd")?.as_f64()
    }

    async fn fetch_tokens(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, f64> {
        let mut out = HashMap::new();
        let Some(platform) = self.platforms.get(&chain_id) else { return out };
        if addresses.is_empty() {
            return out;
        }

        let joined = addresses.iter().map(|a| format!("{:#x}", a)).collect::<Vec<_>>().join(",");
        let url = format!(
            "{}/simple/token_price/{}?contract_addresses={}&vs_currencies=usd",
            self.base_url, platform, joined
        );

        let Ok(response) = self.client.get(&url).send().await else { return out };
        let Ok(body) = response.json::<serde_json::Value>().await else { return out };

        for address in addresses {
            let key = format!("{:#x}", address);
            if let Some(price) = body.get(&key).and_then(|v| v.get("usd")).and_then(|v| v.as_f64()) {
                out.insert(*address, price);
            }
        }
        out
    }
}

#[async_trait]
impl PriceOracle for CoingeckoPriceOracle {
    async fn prices(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, f64> {
        let native = native_token_address();
        let mut result = HashMap::with_capacity(addresses.len());
        let mut to_fetch = Vec::new();

        for &address in addresses {
            if let Some(cached) = self.fresh(chain_id, address) {
                result.insert(address, cached);
            } else {
                to_fetch.push(address);
            }
        }

        if to_fetch.is_empty() {
            return result;
        }

        let wants_native = to_fetch.contains(&native);
        let token_targets: Vec<Address> = to_fetch.iter().copied().filter(|a| *a != native).collect();

        if wants_native {
            match self.fetch_native(chain_id).await {
                Some(price) => {
                    self.store(chain_id, native, price);
                    result.insert(native, price);
                }
                None => {
                    if let Some(stale) = self.stale(chain_id, native) {
                        tracing::warn!(chain_id, "native price fetch failed, serving stale price");
                        result.insert(native, stale);
                    }
                }
            }
        }

        if !token_targets.is_empty() {
            let fetched = self.fetch_tokens(chain_id, &token_targets).await;
            for address in &token_targets {
                if let Some(price) = fetched.get(address) {
                    self.store(chain_id, *address, *price);
                    result.insert(*address, *price);
                } else if let Some(stale) = self.stale(chain_id, *address) {
                    tracing::warn!(chain_id, address = %address, "price fetch failed, serving stale price");
                    result.insert(*address, stale);
                }
            }
        }

        result
    }
}

/// Fixed-price oracle for chains/tests with no live price feed configured.
pub struct StaticPriceOracle {
    prices: HashMap<Address, f64>,
}

impl StaticPriceOracle {
    pub fn new(prices: HashMap<Address, f64>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn prices(&self, _chain_id: u64, addresses: &[Address]) -> HashMap<Address, f64> {
        addresses
            .iter()
            .filter_map(|a| self.prices.get(a).map(|p| (*a, *p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_oracle_returns_only_known_prices() {
        let native = native_token_address();
        let mut prices = HashMap::new();
        prices.insert(native, 3000.0);
        let oracle = StaticPriceOracle::new(prices);

        let unknown = Address::repeat_byte(0x42);
        let result = oracle.prices(1, &[native, unknown]).await;

        assert_eq!(result.get(&native), Some(&3000.0));
        assert!(!result.contains_key(&unknown));
    }
}
