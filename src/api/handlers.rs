use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;

use crate::api::queries;
use crate::api::types::*;
use crate::api::AppState;
use crate::cache::store::{self as cache_store, Freshness};
use crate::chain_profile::{canonicalize_address, parse_address, ChainProfile};
use crate::error::{ApiResult, AppError};
use crate::provider::pool::ProviderPool;
use crate::snapshot::builder;
use crate::snapshot::types::WalletSnapshot;
use crate::tokens::registry;
use crate::tokens::types::TokenSearchFilter;
use crate::tracked::registry as tracked_registry;

fn chain_deps(state: &AppState, chain_id: u64) -> Result<(Arc<ChainProfile>, Arc<ProviderPool>), AppError> {
    let profile = state.profiles.get(&chain_id).cloned().ok_or(AppError::UnsupportedChain(chain_id))?;
    let provider_pool = state.providers.get(chain_id)?;
    Ok((profile, provider_pool))
}

/// §4.7 stale-while-revalidate: fresh rows are returned as-is; stale rows
/// are returned immediately while a refresh runs in the background; missing
/// or hard-expired rows block the caller, bounded by `build_timeout_secs`.
async fn get_or_build_snapshot(
    state: &AppState,
    chain_id: u64,
    wallet: &str,
    force_refresh: bool,
) -> Result<WalletSnapshot, AppError> {
    let (profile, provider_pool) = chain_deps(state, chain_id)?;
    let entry = cache_store::load(&state.db, chain_id, wallet).await.map_err(AppError::Other)?;

    let freshness = match &entry {
        Some(e) => cache_store::classify(e.last_updated, &state.config.cache),
        None => Freshness::Missing,
    };

    if !force_refresh && matches!(freshness, Freshness::Fresh) {
        return Ok(entry.unwrap().snapshot);
    }

    if !force_refresh && matches!(freshness, Freshness::Stale) {
        let state = state.clone();
        let wallet = wallet.to_string();
        let addr = parse_address(&wallet)?;
        tokio::spawn(async move {
            let (profile, provider_pool) = match chain_deps(&state, chain_id) {
                Ok(v) => v,
                Err(_) => return,
            };
            let _ = state
                .single_flight
                .run(chain_id, &wallet, move || async move {
                    builder::refresh_wallet(&state.db, &provider_pool, &profile, &state.config.discovery, state.oracle.as_ref(), addr, false).await
                })
                .await;
        });
        return Ok(entry.unwrap().snapshot);
    }

    let addr = parse_address(wallet)?;
    let state_clone = state.clone();
    let build = state.single_flight.run(chain_id, wallet, move || async move {
        builder::refresh_wallet(
            &state_clone.db,
            &provider_pool,
            &profile,
            &state_clone.config.discovery,
            state_clone.oracle.as_ref(),
            addr,
            force_refresh,
        )
        .await
    });

    let timeout = std::time::Duration::from_secs(state.config.cache.build_timeout_secs);
    match tokio::time::timeout(timeout, build).await {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(e)) => Err(AppError::Other(e)),
        Err(_) => Err(AppError::BuildTimeout),
    }
}

pub async fn wallet_snapshot(
    State(state): State<Arc<AppState>>,
    Path((chain_id, address)): Path<(u64, String)>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<WalletSnapshot> {
    let wallet = canonicalize_address(&address)?;
    let snapshot = get_or_build_snapshot(&state, chain_id, &wallet, query.refresh).await?;
    Ok(Json(snapshot))
}

pub async fn wallet_multi_chain(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<MultiChainSnapshotResponse> {
    let wallet = canonicalize_address(&address)?;
    let mut chains = Vec::new();
    for &chain_id in state.profiles.keys() {
        if let Ok(snapshot) = get_or_build_snapshot(&state, chain_id, &wallet, query.refresh).await {
            chains.push(snapshot);
        }
    }
    Ok(Json(MultiChainSnapshotResponse { address: wallet, chains }))
}

pub async fn wallet_transactions(
    State(state): State<Arc<AppState>>,
    Path((chain_id, address)): Path<(u64, String)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<crate::db::repository::WalletTransaction>> {
    let wallet = canonicalize_address(&address)?;
    let txs = queries::transactions(&state.db, chain_id, &wallet, page.page.unwrap_or(1), page.limit.unwrap_or(20))
        .await
        .map_err(AppError::Other)?;
    Ok(Json(txs))
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Path(chain_id): Path<u64>,
    Query(q): Query<TokenSearchQuery>,
) -> ApiResult<crate::tokens::types::Page<crate::tokens::types::TokenMeta>> {
    let limit = registry::validate_search_limit(q.limit)?;
    let filter = TokenSearchFilter { verified: q.verified, spam: q.spam };
    let page = queries::search_tokens(&state.db, chain_id, &q.q, filter, q.page.unwrap_or(1), limit)
        .await
        .map_err(AppError::Other)?;
    Ok(Json(page))
}

pub async fn list_tokens_all_chains(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenSearchQuery>,
) -> ApiResult<Vec<crate::tokens::types::TokenMeta>> {
    let limit = registry::validate_search_limit(q.limit)?;
    let filter = TokenSearchFilter { verified: q.verified, spam: q.spam };
    let mut combined = Vec::new();
    for &chain_id in state.profiles.keys() {
        if let Ok(page) = queries::search_tokens(&state.db, chain_id, &q.q, filter.clone(), q.page.unwrap_or(1), limit).await {
            combined.extend(page.items);
        }
    }
    Ok(Json(combined))
}

pub async fn add_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddWalletRequest>,
) -> ApiResult<TrackedWalletResponse> {
    chain_deps(&state, req.chain_id)?;
    let wallet = canonicalize_address(&req.address)?;
    let tracked = tracked_registry::add(&state.db, req.chain_id, &wallet).await.map_err(AppError::Other)?;
    Ok(Json(TrackedWalletResponse { chain_id: tracked.chain_id, address: tracked.wallet_address }))
}

pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GetWalletQuery>,
) -> ApiResult<WalletListResponse> {
    let wallet = canonicalize_address(&query.address)?;
    let tracked = queries::tracked_for_wallet(&state.db, &wallet).await.map_err(AppError::Other)?;
    Ok(Json(WalletListResponse { address: wallet, tracked }))
}

pub async fn remove_wallet(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<serde_json::Value> {
    let wallet = canonicalize_address(&address)?;
    let removed = tracked_registry::remove_all_chains(&state.db, &wallet).await.map_err(AppError::Other)?;
    if removed == 0 {
        return Err(AppError::NotTracked);
    }
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let mut chains = Vec::new();
    for (&chain_id, profile) in state.profiles.iter() {
        if let Ok(pool) = state.providers.get(chain_id) {
            let snapshot = pool.health_snapshot();
            let healthy = snapshot.iter().filter(|h| h.is_healthy()).count();
            chains.push(ChainHealth {
                chain_id,
                name: profile.name.clone(),
                healthy_providers: healthy,
                total_providers: snapshot.len(),
            });
        }
    }
    Ok(Json(HealthResponse { status: "ok".to_string(), chains }))
}
