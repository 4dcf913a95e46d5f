pub mod handlers;
pub mod queries;
pub mod types;

use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::store::SingleFlight;
use crate::chain_profile::ChainProfile;
use crate::config::Config;
use crate::price::oracle::PriceOracle;
use crate::provider::pool::ProviderRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub profiles: Arc<HashMap<u64, Arc<ChainProfile>>>,
    pub providers: Arc<ProviderRegistry>,
    pub oracle: Arc<dyn PriceOracle>,
    pub single_flight: Arc<SingleFlight>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/wallet/{address}", get(handlers::wallet_multi_chain))
        .route("/api/wallet/{chain}/{address}", get(handlers::wallet_snapshot))
        .route(
            "/api/wallet/{chain}/{address}/transactions",
            get(handlers::wallet_transactions),
        )
        .route("/api/tokens", get(handlers::list_tokens_all_chains))
        .route("/api/tokens/{chain_id}", get(handlers::list_tokens))
        .route("/api/wallets/add-wallet", post(handlers::add_wallet))
        .route("/api/wallets/get-wallet", get(handlers::get_wallet))
        .route(
            "/api/wallets/remove-wallet/{address}",
            delete(handlers::remove_wallet),
        )
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(state: AppState, host: &str, port: u16) -> eyre::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
