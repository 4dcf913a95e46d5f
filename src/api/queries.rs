//! Thin composition layer between HTTP handlers and the domain modules —
//! mirrors the teacher's handlers/queries split even though most of the
//! actual query logic now lives in `tokens::registry` / `tracked::registry`
//! / `db::repository`.

use sqlx::PgPool;

use crate::api::types::TrackedWalletResponse;
use crate::db::repository::{self, WalletTransaction};
use crate::tokens::types::{Page, TokenMeta, TokenSearchFilter};
use crate::tracked::registry;

pub async fn tracked_for_wallet(pool: &PgPool, wallet: &str) -> eyre::Result<Vec<TrackedWalletResponse>> {
    Ok(registry::list_for_wallet(pool, wallet)
        .await?
        .into_iter()
        .map(|t| TrackedWalletResponse { chain_id: t.chain_id, address: t.wallet_address })
        .collect())
}

pub async fn search_tokens(
    pool: &PgPool,
    chain_id: u64,
    query: &str,
    filter: TokenSearchFilter,
    page: i64,
    limit: i64,
) -> eyre::Result<Page<TokenMeta>> {
    crate::tokens::registry::search(pool, chain_id, query, filter, page, limit).await
}

pub async fn transactions(
    pool: &PgPool,
    chain_id: u64,
    wallet: &str,
    page: i64,
    limit: i64,
) -> eyre::Result<Vec<WalletTransaction>> {
    repository::wallet_transactions(pool, chain_id, wallet, page, limit).await
}
