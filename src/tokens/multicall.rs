//! §4.3 Multicall Engine — batches view calls through a deployed Multicall3
//! contract, tolerating partial failure and bisecting batches that revert
//! as a whole.

use alloy::primitives::{Address, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use std::future::Future;
use std::pin::Pin;

use crate::provider::pool::ProviderPool;

sol! {
    #[derive(Debug)]
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    #[derive(Debug)]
    struct Call3Result {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calls) external payable returns (Call3Result[] returnData);
}

sol! {
    function balanceOf(address account) external view returns (uint256);
    function decimals() external view returns (uint8);
    function symbol() external view returns (string);
    function name() external view returns (string);
}

/// One leaf call to batch: a contract address plus ABI-encoded calldata.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub target: Address,
    pub call_data: Bytes,
}

#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success(Bytes),
    /// §7 `CallFailed` — this entry's balance/metadata is excluded rather
    /// than aborting the whole batch.
    Failed,
}

const MAX_BATCH: usize = 100;

pub fn balance_of_call(holder: Address) -> Bytes {
    balanceOfCall { account: holder }.abi_encode().into()
}

pub fn decimals_call() -> Bytes {
    decimalsCall {}.abi_encode().into()
}

pub fn symbol_call() -> Bytes {
    symbolCall {}.abi_encode().into()
}

pub fn name_call() -> Bytes {
    nameCall {}.abi_encode().into()
}

pub fn decode_balance(data: &[u8]) -> Option<alloy::primitives::U256> {
    balanceOfCall::abi_decode_returns(data).ok()
}

pub fn decode_decimals(data: &[u8]) -> Option<u8> {
    decimalsCall::abi_decode_returns(data).ok()
}

pub fn decode_symbol(data: &[u8]) -> Option<String> {
    symbolCall::abi_decode_returns(data).ok()
}

pub fn decode_name(data: &[u8]) -> Option<String> {
    nameCall::abi_decode_returns(data).ok()
}

/// Execute every call in `requests` against `multicall_address`, batching in
/// groups of [`MAX_BATCH`]. The returned vector is parallel to `requests`.
pub async fn execute_batch(
    pool: &ProviderPool,
    multicall_address: Address,
    requests: &[CallRequest],
) -> Vec<CallOutcome> {
    let mut results = Vec::with_capacity(requests.len());
    for chunk in requests.chunks(MAX_BATCH) {
        let outcomes = execute_chunk(pool, multicall_address, chunk.to_vec()).await;
        results.extend(outcomes);
    }
    results
}

/// Execute one batch (≤ [`MAX_BATCH`] calls). If the whole batch reverts or
/// returns malformed data, bisect in half and retry each half; singletons
/// that still fail are reported as [`CallOutcome::Failed`].
fn execute_chunk<'a>(
    pool: &'a ProviderPool,
    multicall_address: Address,
    chunk: Vec<CallRequest>,
) -> Pin<Box<dyn Future<Output = Vec<CallOutcome>> + Send + 'a>> {
    Box::pin(async move {
        if chunk.is_empty() {
            return Vec::new();
        }

        let calls: Vec<Call3> = chunk
            .iter()
            .map(|c| Call3 {
                target: c.target,
                allowFailure: true,
                callData: c.call_data.clone(),
            })
            .collect();

        let encoded = aggregate3Call { calls }.abi_encode();
        let tx = TransactionRequest::default()
            .to(multicall_address)
            .input(Bytes::from(encoded).into());

        match pool.call(tx).await {
            Ok(return_data) => match aggregate3Call::abi_decode_returns(&return_data) {
                Ok(decoded) => decoded
                    .into_iter()
                    .map(|r| {
                        if r.success {
                            CallOutcome::Success(r.returnData)
                        } else {
                            CallOutcome::Failed
                        }
                    })
                    .collect(),
                Err(e) => {
                    tracing::debug!(error = %e, batch_len = chunk.len(), "malformed multicall response, bisecting");
                    bisect(pool, multicall_address, chunk).await
                }
            },
            Err(e) => {
                if chunk.len() == 1 {
                    tracing::debug!(target = %chunk[0].target, error = %e, "singleton multicall entry failed");
                    vec![CallOutcome::Failed]
                } else {
                    tracing::debug!(error = %e, batch_len = chunk.len(), "multicall batch reverted, bisecting");
                    bisect(pool, multicall_address, chunk).await
                }
            }
        }
    })
}

async fn bisect(pool: &ProviderPool, multicall_address: Address, mut chunk: Vec<CallRequest>) -> Vec<CallOutcome> {
    let mid = chunk.len() / 2;
    let right = chunk.split_off(mid);
    let left = chunk;

    let mut left_results = execute_chunk(pool, multicall_address, left).await;
    let right_results = execute_chunk(pool, multicall_address, right).await;
    left_results.extend(right_results);
    left_results
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn balance_call_roundtrips_encoding() {
        let holder = address!("000000000000000000000000000000000000aa");
        let encoded = balance_of_call(holder);
        assert!(!encoded.is_empty());
    }
}
