//! §4.2 Token Registry — persistent (chain, address) -> metadata mapping.

use alloy::primitives::Address;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::chain_profile::ChainProfile;
use crate::error::AppError;
use crate::provider::pool::ProviderPool;
use crate::tokens::multicall::{self, CallOutcome, CallRequest};
use crate::tokens::types::{Page, TokenMeta, TokenSearchFilter};

/// Batch-load metadata for a set of addresses on one chain. Addresses not
/// present in the registry are simply absent from the returned map.
pub async fn get(pool: &PgPool, chain_id: u64, addrs: &[Address]) -> eyre::Result<HashMap<Address, TokenMeta>> {
    if addrs.is_empty() {
        return Ok(HashMap::new());
    }
    let addr_strs: Vec<String> = addrs.iter().map(|a| a.to_string().to_lowercase()).collect();

    let rows: Vec<TokenMeta> = sqlx::query_as(
        "SELECT chain_id, address, symbol, name, decimals, logo, verified, possible_spam, created_at, updated_at
         FROM token_meta WHERE chain_id = $1 AND address = ANY($2)",
    )
    .bind(chain_id as i64)
    .bind(&addr_strs)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|t| Address::from_str(&t.address).ok().map(|a| (a, t)))
        .collect())
}

/// §4.2 search: case-insensitive substring on symbol/name, exact match on
/// address. 1-indexed pagination, `limit` clamped to [1,100].
pub async fn search(
    pool: &PgPool,
    chain_id: u64,
    query: &str,
    filter: TokenSearchFilter,
    page: i64,
    limit: i64,
) -> eyre::Result<Page<TokenMeta>> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let offset = (page - 1) * limit;
    let like_pattern = format!("%{}%", query.to_lowercase());
    let exact_addr = query.to_lowercase();

    let rows: Vec<TokenMeta> = sqlx::query_as(
        "SELECT chain_id, address, symbol, name, decimals, logo, verified, possible_spam, created_at, updated_at
         FROM token_meta
         WHERE chain_id = $1
           AND (LOWER(symbol) LIKE $2 OR LOWER(name) LIKE $2 OR address = $3)
           AND ($4::bool IS NULL OR verified = $4)
           AND ($5::bool IS NULL OR possible_spam = $5)
         ORDER BY symbol ASC
         LIMIT $6 OFFSET $7",
    )
    .bind(chain_id as i64)
    .bind(&like_pattern)
    .bind(&exact_addr)
    .bind(filter.verified)
    .bind(filter.spam)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM token_meta
         WHERE chain_id = $1
           AND (LOWER(symbol) LIKE $2 OR LOWER(name) LIKE $2 OR address = $3)
           AND ($4::bool IS NULL OR verified = $4)
           AND ($5::bool IS NULL OR possible_spam = $5)",
    )
    .bind(chain_id as i64)
    .bind(&like_pattern)
    .bind(&exact_addr)
    .bind(filter.verified)
    .bind(filter.spam)
    .fetch_one(pool)
    .await?;

    Ok(Page::new(rows, page, limit, total))
}

/// Full listing for a chain, paginated (no search filter).
pub async fn list_page(pool: &PgPool, chain_id: u64, page: i64, limit: i64) -> eyre::Result<Page<TokenMeta>> {
    search(pool, chain_id, "", TokenSearchFilter::default(), page, limit).await
}

pub async fn list_verified(pool: &PgPool, chain_id: u64) -> eyre::Result<Vec<TokenMeta>> {
    let rows: Vec<TokenMeta> = sqlx::query_as(
        "SELECT chain_id, address, symbol, name, decimals, logo, verified, possible_spam, created_at, updated_at
         FROM token_meta WHERE chain_id = $1 AND verified = true",
    )
    .bind(chain_id as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn verified_addresses(pool: &PgPool, chain_id: u64) -> eyre::Result<HashSet<Address>> {
    Ok(list_verified(pool, chain_id)
        .await?
        .into_iter()
        .filter_map(|t| Address::from_str(&t.address).ok())
        .collect())
}

/// Insert-or-fetch a token discovered by the log crawler. When the token is
/// unknown, its `symbol`/`name`/`decimals` are fetched via §4.3 multicall
/// before the row is written; newly-discovered tokens default to
/// unverified, non-spam.
pub async fn upsert_discovered(
    pool: &PgPool,
    profile: &ChainProfile,
    provider_pool: &ProviderPool,
    address: Address,
) -> eyre::Result<TokenMeta> {
    if let Some(existing) = get(pool, profile.id, &[address]).await?.remove(&address) {
        return Ok(existing);
    }

    let requests = vec![
        CallRequest { target: address, call_data: multicall::symbol_call() },
        CallRequest { target: address, call_data: multicall::name_call() },
        CallRequest { target: address, call_data: multicall::decimals_call() },
    ];
    let outcomes = multicall::execute_batch(provider_pool, profile.multicall_address, &requests).await;

    let symbol = match &outcomes[0] {
        CallOutcome::Success(data) => multicall::decode_symbol(data).unwrap_or_else(|| "UNKNOWN".to_string()),
        CallOutcome::Failed => "UNKNOWN".to_string(),
    };
    let name = match &outcomes[1] {
        CallOutcome::Success(data) => multicall::decode_name(data).unwrap_or_else(|| symbol.clone()),
        CallOutcome::Failed => symbol.clone(),
    };
    let decimals = match &outcomes[2] {
        CallOutcome::Success(data) => multicall::decode_decimals(data).unwrap_or(18),
        CallOutcome::Failed => 18,
    };

    let addr_str = address.to_string().to_lowercase();
    let row: TokenMeta = sqlx::query_as(
        "INSERT INTO token_meta (chain_id, address, symbol, name, decimals, verified, possible_spam, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, false, false, NOW(), NOW())
         ON CONFLICT (chain_id, address) DO UPDATE SET updated_at = token_meta.updated_at
         RETURNING chain_id, address, symbol, name, decimals, logo, verified, possible_spam, created_at, updated_at",
    )
    .bind(profile.id as i64)
    .bind(&addr_str)
    .bind(&symbol)
    .bind(&name)
    .bind(decimals as i16)
    .fetch_one(pool)
    .await?;

    tracing::info!(chain = %profile.name, address = %addr_str, symbol = %row.symbol, "discovered new token");
    Ok(row)
}

pub fn validate_search_limit(limit: Option<i64>) -> Result<i64, AppError> {
    let limit = limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::InvalidInput("limit must be between 1 and 100".to_string()));
    }
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_limit_bounds() {
        assert_eq!(validate_search_limit(None).unwrap(), 20);
        assert_eq!(validate_search_limit(Some(100)).unwrap(), 100);
        assert!(validate_search_limit(Some(0)).is_err());
        assert!(validate_search_limit(Some(101)).is_err());
    }
}
