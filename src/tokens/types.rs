//! `TokenMeta`, §3 — persistent (chain, address) -> metadata row.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TokenMeta {
    pub chain_id: i64,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: i16,
    pub logo: Option<String>,
    pub verified: bool,
    pub possible_spam: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSearchFilter {
    pub verified: Option<bool>,
    pub spam: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        let has_next_page = page * limit < total;
        Self {
            items,
            page,
            limit,
            total,
            has_next_page,
        }
    }
}
