//! §4.8 Tracked-Wallet Registry — wallets the Head Scanner actively watches
//! for on-chain activity, independent of ad-hoc snapshot reads.

use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TrackedWallet {
    pub chain_id: i64,
    pub wallet_address: String,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

pub async fn add(pool: &PgPool, chain_id: u64, wallet: &str) -> eyre::Result<TrackedWallet> {
    let row: TrackedWallet = sqlx::query_as(
        "INSERT INTO tracked_wallets (chain_id, wallet_address, added_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (chain_id, wallet_address) DO UPDATE SET wallet_address = tracked_wallets.wallet_address
         RETURNING chain_id, wallet_address, added_at",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn remove(pool: &PgPool, chain_id: u64, wallet: &str) -> eyre::Result<bool> {
    let result = sqlx::query("DELETE FROM tracked_wallets WHERE chain_id = $1 AND wallet_address = $2")
        .bind(chain_id as i64)
        .bind(wallet)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_all_chains(pool: &PgPool, wallet: &str) -> eyre::Result<u64> {
    let result = sqlx::query("DELETE FROM tracked_wallets WHERE wallet_address = $1")
        .bind(wallet)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list(pool: &PgPool, chain_id: u64) -> eyre::Result<Vec<TrackedWallet>> {
    let rows: Vec<TrackedWallet> = sqlx::query_as(
        "SELECT chain_id, wallet_address, added_at FROM tracked_wallets WHERE chain_id = $1 ORDER BY added_at ASC",
    )
    .bind(chain_id as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_for_wallet(pool: &PgPool, wallet: &str) -> eyre::Result<Vec<TrackedWallet>> {
    let rows: Vec<TrackedWallet> = sqlx::query_as(
        "SELECT chain_id, wallet_address, added_at FROM tracked_wallets WHERE wallet_address = $1 ORDER BY chain_id ASC",
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_addresses(pool: &PgPool, chain_id: u64) -> eyre::Result<Vec<String>> {
    Ok(list(pool, chain_id).await?.into_iter().map(|w| w.wallet_address).collect())
}
