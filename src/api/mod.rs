//! HTTP API 层（axum 路由装配）

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app_state::AppState;

pub mod response;
pub mod wallet_api;

/// 装配全部路由
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(wallet_api::healthz))
        .route("/metrics", get(wallet_api::metrics_endpoint))
        .route("/chains", get(wallet_api::list_chains))
        .route("/wallets", post(wallet_api::create_wallet))
        .route("/wallets/:id", get(wallet_api::get_wallet_details))
        .route("/wallets/:id/addresses", post(wallet_api::create_address))
        .route("/wallets/:id/sweep", post(wallet_api::sweep_wallet))
        .route("/wallets/:id/lock", post(wallet_api::lock_wallet))
        .route("/wallets/:id/unlock", post(wallet_api::unlock_wallet))
        .route("/balance", get(wallet_api::get_balance))
        .route("/withdrawals", post(wallet_api::create_withdrawal))
        .route(
            "/accounts/:id/deposits",
            get(wallet_api::list_account_deposits),
        )
        .route(
            "/accounts/:id/withdrawals",
            get(wallet_api::list_account_withdrawals),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
