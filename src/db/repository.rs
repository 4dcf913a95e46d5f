//! Cross-cutting queries that don't belong to a single domain module:
//! the per-chain sync watermark (§4.9) and the wallet transaction history
//! surfaced by the `/transactions` endpoint (§6).

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WalletTransaction {
    pub chain_id: i64,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub block_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogEntry<'a> {
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub token_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: &'a str,
}

/// Batch-insert transfers observed by the Head Scanner. Chunked into groups
/// of 1000 to stay within Postgres' bind-parameter limit.
pub async fn insert_transfers_batch(pool: &PgPool, chain_id: u64, entries: &[LogEntry<'_>]) -> eyre::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    for chunk in entries.chunks(1000) {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO wallet_transactions (chain_id, tx_hash, block_number, log_index, \
             token_address, from_address, to_address, amount) ",
        );

        query_builder.push_values(chunk, |mut b, e| {
            b.push_bind(chain_id as i64)
                .push_bind(e.tx_hash.to_string())
                .push_bind(e.block_number as i64)
                .push_bind(e.log_index as i64)
                .push_bind(e.token_address.to_string().to_lowercase())
                .push_bind(e.from_address.to_string().to_lowercase())
                .push_bind(e.to_address.to_string().to_lowercase())
                .push_bind(e.amount);
        });

        query_builder.push(" ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING");
        query_builder.build().execute(pool).await?;
    }

    Ok(())
}

pub async fn wallet_transactions(
    pool: &PgPool,
    chain_id: u64,
    wallet: &str,
    page: i64,
    limit: i64,
) -> eyre::Result<Vec<WalletTransaction>> {
    let offset = (page.max(1) - 1) * limit.clamp(1, 100);
    let rows: Vec<WalletTransaction> = sqlx::query_as(
        "SELECT chain_id, tx_hash, block_number, log_index, token_address, from_address, to_address, amount, block_timestamp
         FROM wallet_transactions
         WHERE chain_id = $1 AND (from_address = $2 OR to_address = $2)
         ORDER BY block_number DESC, log_index DESC
         LIMIT $3 OFFSET $4",
    )
    .bind(chain_id as i64)
    .bind(wallet)
    .bind(limit.clamp(1, 100))
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// §4.9 per-chain scan watermark. Returns `None` for a chain the Head
/// Scanner has never run for, signalling the caller to seed it from
/// `discovery_start_block` or the current tip.
pub async fn get_synced_block(pool: &PgPool, chain_id: u64) -> eyre::Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT synced_block FROM block_sync_status WHERE chain_id = $1")
        .bind(chain_id as i64)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(b,)| b as u64))
}

pub async fn set_synced_block(pool: &PgPool, chain_id: u64, block: u64) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO block_sync_status (chain_id, synced_block, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (chain_id) DO UPDATE SET synced_block = EXCLUDED.synced_block, updated_at = NOW()",
    )
    .bind(chain_id as i64)
    .bind(block as i64)
    .execute(pool)
    .await?;
    Ok(())
}
