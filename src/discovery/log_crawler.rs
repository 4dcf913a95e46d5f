//! §4.4 Log Crawler — recursive bisection over `Transfer` logs to bypass
//! per-provider range limits.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::provider::pool::ProviderPool;

sol! {
    pub event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Enumerate the set of token addresses the wallet has interacted with
/// (as either `from` or `to` of a `Transfer` event) between `start_block`
/// and `end_block` inclusive.
pub async fn discover_token_addresses(
    pool: &ProviderPool,
    wallet: Address,
    start_block: u64,
    end_block: u64,
    soft_cap: usize,
) -> Result<HashSet<Address>, AppError> {
    let logs = crawl(pool, wallet, start_block, end_block, soft_cap, max_depth(start_block, end_block)).await?;
    Ok(logs.into_iter().map(|l| l.inner.address).collect())
}

/// Returns the raw, deduplicated log set (by `(tx_hash, log_index)`),
/// ordered by `(block_number, log_index)` ascending.
pub async fn crawl(
    pool: &ProviderPool,
    wallet: Address,
    start_block: u64,
    end_block: u64,
    soft_cap: usize,
    max_depth: u32,
) -> Result<Vec<Log>, AppError> {
    let logs = crawl_range(pool, wallet, start_block, end_block, soft_cap, max_depth).await?;
    Ok(dedup_and_order(logs))
}

pub fn max_depth(start_block: u64, end_block: u64) -> u32 {
    let span = end_block.saturating_sub(start_block) + 1;
    (64 - span.max(1).leading_zeros()).max(1)
}

fn crawl_range<'a>(
    pool: &'a ProviderPool,
    wallet: Address,
    from_block: u64,
    to_block: u64,
    soft_cap: usize,
    depth_budget: u32,
) -> Pin<Box<dyn Future<Output = Result<Vec<Log>, AppError>> + Send + 'a>> {
    Box::pin(async move {
        let to_logs = fetch_direction(pool, wallet, from_block, to_block, true).await;
        let from_logs = fetch_direction(pool, wallet, from_block, to_block, false).await;

        let needs_split = matches!(&to_logs, Err(e) if is_range_limit_error(e))
            || matches!(&from_logs, Err(e) if is_range_limit_error(e))
            || to_logs.as_ref().map(|l| l.len()).unwrap_or(0) > soft_cap
            || from_logs.as_ref().map(|l| l.len()).unwrap_or(0) > soft_cap;

        if !needs_split {
            let mut combined = to_logs?;
            combined.extend(from_logs?);
            return Ok(combined);
        }

        if from_block == to_block {
            return Err(AppError::LogRangeIrrecoverable(from_block));
        }
        if depth_budget == 0 {
            return Err(AppError::LogRangeIrrecoverable(from_block));
        }

        let mid = from_block + (to_block - from_block) / 2;

        let left = crawl_range(pool, wallet, from_block, mid, soft_cap, depth_budget - 1).await;
        let right = crawl_range(pool, wallet, mid + 1, to_block, soft_cap, depth_budget - 1).await;

        match (left, right) {
            (Ok(mut l), Ok(r)) => {
                l.extend(r);
                Ok(l)
            }
            // §7 LogRangeIrrecoverable on a single block is skipped, not
            // fatal: surface what the healthy half found and keep going.
            (Ok(l), Err(AppError::LogRangeIrrecoverable(b))) => {
                tracing::warn!(block = b, "skipping irrecoverable log range");
                Ok(l)
            }
            (Err(AppError::LogRangeIrrecoverable(b)), Ok(r)) => {
                tracing::warn!(block = b, "skipping irrecoverable log range");
                Ok(r)
            }
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    })
}

async fn fetch_direction(
    pool: &ProviderPool,
    wallet: Address,
    from_block: u64,
    to_block: u64,
    to_side: bool,
) -> Result<Vec<Log>, AppError> {
    let topic_wallet = B256::left_padding_from(wallet.as_slice());
    let mut filter = Filter::new()
        .event_signature(Transfer::SIGNATURE_HASH)
        .from_block(from_block)
        .to_block(to_block);
    filter = if to_side {
        filter.topic2(topic_wallet)
    } else {
        filter.topic1(topic_wallet)
    };

    pool.get_logs(&filter).await
}

fn is_range_limit_error(err: &AppError) -> bool {
    match err {
        AppError::ProviderUnavailable(_) => false,
        other => {
            let msg = other.to_string().to_lowercase();
            msg.contains("query returned more than") || msg.contains("413") || msg.contains("range")
        }
    }
}

fn dedup_and_order(logs: Vec<Log>) -> Vec<Log> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Log> = logs
        .into_iter()
        .filter(|l| {
            let key = (l.transaction_hash.unwrap_or_default(), l.log_index.unwrap_or(0));
            seen.insert(key)
        })
        .collect();

    unique.sort_by_key(|l| (l.block_number.unwrap_or(0), l.log_index.unwrap_or(0)));
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_depth_matches_log2_ceiling() {
        assert_eq!(max_depth(0, 0), 1);
        assert_eq!(max_depth(0, 1), 1);
        assert_eq!(max_depth(0, 3), 2);
        assert_eq!(max_depth(0, 1023), 10);
        assert_eq!(max_depth(1000, 1000), 1);
    }

    #[test]
    fn range_limit_error_detection() {
        assert!(is_range_limit_error(&AppError::InvalidInput(
            "query returned more than 10000 results".to_string()
        )));
        assert!(!is_range_limit_error(&AppError::ProviderUnavailable(1)));
    }

    #[test]
    fn dedup_keeps_one_entry_per_tx_and_log_index() {
        let mut a = Log::default();
        a.transaction_hash = Some(B256::repeat_byte(1));
        a.log_index = Some(0);
        a.block_number = Some(10);
        let mut b = a.clone();
        b.block_number = Some(10);

        let result = dedup_and_order(vec![a, b]);
        assert_eq!(result.len(), 1);
    }

    fn sample_log(tx: u8, log_index: u64, block: u64) -> Log {
        let mut log = Log::default();
        log.transaction_hash = Some(B256::repeat_byte(tx));
        log.log_index = Some(log_index);
        log.block_number = Some(block);
        log
    }

    /// §8 property 7: the result set is independent of the order the
    /// bisected halves were concatenated in (a stand-in for "independent of
    /// how the range is bisected", exercised on pure data rather than a
    /// live RPC split).
    #[test]
    fn result_set_is_independent_of_input_order() {
        let logs = vec![
            sample_log(1, 0, 100),
            sample_log(2, 1, 50),
            sample_log(3, 0, 75),
        ];

        let mut reversed = logs.clone();
        reversed.reverse();

        let a = dedup_and_order(logs);
        let b = dedup_and_order(reversed);
        assert_eq!(
            a.iter().map(|l| l.transaction_hash).collect::<Vec<_>>(),
            b.iter().map(|l| l.transaction_hash).collect::<Vec<_>>()
        );
    }
}
