//! §6 HTTP surface — request/response DTOs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TokenSearchQuery {
    #[serde(default)]
    pub q: String,
    pub verified: Option<bool>,
    pub spam: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddWalletRequest {
    pub chain_id: u64,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct GetWalletQuery {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct TrackedWalletResponse {
    pub chain_id: i64,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct WalletListResponse {
    pub address: String,
    pub tracked: Vec<TrackedWalletResponse>,
}

#[derive(Debug, Serialize)]
pub struct MultiChainSnapshotResponse {
    pub address: String,
    pub chains: Vec<crate::snapshot::types::WalletSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chains: Vec<ChainHealth>,
}

#[derive(Debug, Serialize)]
pub struct ChainHealth {
    pub chain_id: u64,
    pub name: String,
    pub healthy_providers: usize,
    pub total_providers: usize,
}
