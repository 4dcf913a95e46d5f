use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use walletscope_engine::api::{self, AppState};
use walletscope_engine::cache::store::{self as cache_store, SingleFlight};
use walletscope_engine::chain_profile::ChainProfile;
use walletscope_engine::config::Config;
use walletscope_engine::price::oracle::{CoingeckoPriceOracle, PriceOracle};
use walletscope_engine::provider::pool::{ProviderPool, ProviderRegistry};
use walletscope_engine::scanner::head_scanner;
use walletscope_engine::tracked::refresher;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    tracing::info!("walletscope-engine starting");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Arc::new(Config::load(&config_path)?);
    tracing::info!(chains = config.chains.len(), "configuration loaded from {}", config_path);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("failed to connect to database: {}", e))?;
    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("failed to run migrations: {}", e))?;
    tracing::info!("database migrations complete");

    let mut profiles = HashMap::new();
    let mut pools = HashMap::new();
    for chain_cfg in &config.chains {
        let profile = Arc::new(ChainProfile::from_config(chain_cfg)?);
        let provider_pool = Arc::new(ProviderPool::connect(&profile, &config.provider)?);
        pools.insert(profile.id, provider_pool);
        profiles.insert(profile.id, profile);
    }
    let profiles = Arc::new(profiles);
    let providers = Arc::new(ProviderRegistry::new(pools));

    let oracle: Arc<dyn PriceOracle> = Arc::new(CoingeckoPriceOracle::new(
        Duration::from_secs(config.cache.ttl_secs),
        default_coingecko_platforms(),
        default_native_coin_ids(),
    ));

    let single_flight = Arc::new(SingleFlight::new());
    let global_permits = Arc::new(Semaphore::new(config.concurrency.global_build_permits));
    let shutdown = CancellationToken::new();

    let mut handles = Vec::new();

    for (&chain_id, profile) in profiles.iter() {
        let profile = profile.clone();
        let provider_pool = providers.get(chain_id)?;
        let discovery_cfg = Arc::new(config.discovery.clone());
        let pool = pool.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            head_scanner::run(profile, discovery_cfg, pool, provider_pool, shutdown).await;
        }));
    }

    for (&chain_id, profile) in profiles.iter() {
        let profile = profile.clone();
        let config = config.clone();
        let pool = pool.clone();
        let providers = providers.clone();
        let oracle = oracle.clone();
        let global_permits = global_permits.clone();
        let shutdown = shutdown.clone();
        let _ = chain_id;
        handles.push(tokio::spawn(async move {
            refresher::run(profile, config, pool, providers, oracle, global_permits, shutdown).await;
        }));
    }

    for &chain_id in profiles.keys() {
        let provider_pool = providers.get(chain_id)?;
        let probe_interval = Duration::from_secs(config.provider.probe_interval_secs);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(probe_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => {}
                }
                provider_pool.probe_unhealthy().await;
            }
        }));
    }

    {
        let pool = pool.clone();
        let cache_cfg = config.cache.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            sweep_loop(pool, cache_cfg, shutdown).await;
        }));
    }

    let state = AppState {
        db: pool.clone(),
        config: config.clone(),
        profiles: profiles.clone(),
        providers: providers.clone(),
        oracle: oracle.clone(),
        single_flight,
    };

    let http_cfg = config.http.clone();
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        tokio::select! {
            result = api::serve(state, &http_cfg.host, http_cfg.port) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "API server exited with error");
                }
            }
            _ = server_shutdown.cancelled() => {}
        }
    });

    tracing::info!("all background tasks started, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping all tasks...");
    shutdown.cancel();

    let _ = server_handle.await;
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("walletscope-engine stopped gracefully");
    Ok(())
}

/// §4.7 background cache maintenance: clear stuck `syncing` flags and evict
/// hard-expired rows so they fall back to the on-demand build path.
async fn sweep_loop(pool: sqlx::PgPool, cfg: walletscope_engine::config::CacheConfig, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.sweep_interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        match cache_store::stuck_syncing_wallets(&pool, &cfg).await {
            Ok(rows) => {
                for (chain_id, wallet) in rows {
                    tracing::warn!(chain_id, wallet = %wallet, "recovering stuck syncing flag");
                    let _ = cache_store::mark_syncing(&pool, chain_id as u64, &wallet, false).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "stuck-sync sweep failed"),
        }

        match cache_store::expired_rows(&pool, &cfg).await {
            Ok(rows) => {
                for (chain_id, wallet) in rows {
                    let _ = cache_store::delete(&pool, chain_id, &wallet).await;
                }
            }
            Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
        }
    }
}

fn default_coingecko_platforms() -> HashMap<u64, String> {
    [
        (1, "ethereum"),
        (56, "binance-smart-chain"),
        (137, "polygon-pos"),
        (42161, "arbitrum-one"),
        (10, "optimistic-ethereum"),
        (8453, "base"),
    ]
    .into_iter()
    .map(|(id, platform)| (id, platform.to_string()))
    .collect()
}

fn default_native_coin_ids() -> HashMap<u64, String> {
    [
        (1, "ethereum"),
        (56, "binancecoin"),
        (137, "matic-network"),
        (42161, "ethereum"),
        (10, "ethereum"),
        (8453, "ethereum"),
    ]
    .into_iter()
    .map(|(id, coin)| (id, coin.to_string()))
    .collect()
}
