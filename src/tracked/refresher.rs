//! §4.8 Background Refresher — periodically rebuilds every tracked wallet's
//! snapshot so the cache stays warm ahead of reads, gated by both a global
//! build-permit semaphore and each chain's own scanner concurrency limit.

use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::chain_profile::{parse_address, ChainProfile};
use crate::config::Config;
use crate::price::oracle::PriceOracle;
use crate::provider::pool::ProviderRegistry;
use crate::snapshot::builder;
use crate::tracked::registry;

/// Run the periodic refresh loop for one chain until cancelled.
pub async fn run(
    profile: Arc<ChainProfile>,
    config: Arc<Config>,
    db: PgPool,
    providers: Arc<ProviderRegistry>,
    oracle: Arc<dyn PriceOracle>,
    global_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    let chain_semaphore = Arc::new(Semaphore::new(profile.scanner_concurrency));
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.discovery.refresh_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %profile.name, "refresher stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let wallets = match registry::all_addresses(&db, profile.id).await {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(chain = %profile.name, error = %e, "failed to list tracked wallets");
                continue;
            }
        };

        let mut handles = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            let Ok(addr) = parse_address(&wallet) else { continue };

            let provider_pool = match providers.get(profile.id) {
                Ok(p) => p,
                Err(_) => continue,
            };

            let global = global_permits.clone();
            let chain_sem = chain_semaphore.clone();
            let db = db.clone();
            let profile = profile.clone();
            let config = config.clone();
            let oracle = oracle.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_global_permit) = global.acquire_owned().await else { return };
                let Ok(_chain_permit) = chain_sem.acquire_owned().await else { return };

                match builder::refresh_wallet(&db, &provider_pool, &profile, &config.discovery, oracle.as_ref(), addr, false).await {
                    Ok(_) => tracing::debug!(chain = %profile.name, wallet = %wallet, "refreshed tracked wallet"),
                    Err(e) => tracing::warn!(chain = %profile.name, wallet = %wallet, error = %e, "tracked wallet refresh failed"),
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
