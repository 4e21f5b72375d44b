//! 钱包/清算 API

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::response::{success_response, ApiResponse},
    app_state::AppState,
    error::AppError,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 请求/响应模型
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub account_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateWalletResponse {
    pub account_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAddressRequest {
    pub chain: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub chain: String,
    pub address: String,
    /// 代币合约地址（可选）
    pub token: Option<String>,
    /// 代币精度，缺省 18
    pub token_decimals: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub chain: String,
    pub address: String,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SweepRequest {
    pub chain: String,
}

#[derive(Debug, Serialize)]
pub struct WalletDetailsResponse {
    pub wallet: crate::domain::HdWallet,
    pub addresses: Vec<crate::domain::WalletAddress>,
    /// 解密助记词：上游必须先完成二次认证
    pub mnemonic: String,
}

#[derive(Debug, Serialize)]
pub struct ChainInfo {
    pub chain: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub minimum_deposit: Decimal,
    pub family: crate::domain::ChainFamily,
}

#[derive(Debug, Serialize)]
pub struct ListChainsResponse {
    pub total: usize,
    pub chains: Vec<ChainInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub chain: String,
    pub destination: String,
    pub amount: Decimal,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 处理函数
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /wallets — 调度钱包开通任务（异步）
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<ApiResponse<CreateWalletResponse>>, AppError> {
    if let Some(wallet) = state
        .wallet_service
        .find_wallet_by_account(req.account_id)
        .await?
    {
        return Err(AppError::wallet_already_exists(format!(
            "Account {} already has wallet {}",
            req.account_id, wallet.id
        )));
    }

    Arc::clone(&state.provisioning).spawn(req.account_id, req.user_id);

    success_response(CreateWalletResponse {
        account_id: req.account_id,
        status: "provisioning".to_string(),
    })
}

/// POST /wallets/:id/addresses — 分配充值地址
pub async fn create_address(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
    Json(req): Json<CreateAddressRequest>,
) -> Result<Json<ApiResponse<crate::domain::WalletAddress>>, AppError> {
    if state.registry.get(&req.chain).is_none() {
        return Err(AppError::chain_not_supported(format!(
            "Unsupported chain: {}",
            req.chain
        )));
    }

    let wallet = state
        .wallet_service
        .find_wallet(wallet_id)
        .await?
        .ok_or_else(|| AppError::wallet_not_found(format!("Wallet not found: {}", wallet_id)))?;
    if wallet.is_locked {
        return Err(AppError::wallet_locked(format!(
            "Wallet {} is locked",
            wallet_id
        )));
    }

    let address = state
        .wallet_service
        .allocate_address(wallet_id, &req.chain)
        .await?;
    success_response(address)
}

/// GET /balance — 实时链上余额
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalanceResponse>>, AppError> {
    if state.registry.get(&query.chain).is_none() {
        return Err(AppError::chain_not_supported(format!(
            "Unsupported chain: {}",
            query.chain
        )));
    }

    let token_decimals = query.token_decimals.unwrap_or(18);
    if token_decimals > crate::service::balance_checker::MAX_TOKEN_DECIMALS {
        return Err(AppError::invalid_amount(format!(
            "token_decimals {} exceeds supported maximum {}",
            token_decimals,
            crate::service::balance_checker::MAX_TOKEN_DECIMALS
        )));
    }

    let token = query.token.as_deref().map(|t| (t, token_decimals));

    let balance = state
        .wallet_service
        .check_balance(&query.chain, &query.address, token)
        .await
        .map_err(|e| AppError::rpc_error(format!("Balance query failed: {:#}", e)))?;

    success_response(BalanceResponse {
        chain: query.chain,
        address: query.address,
        balance,
    })
}

/// POST /wallets/:id/sweep — 手动归集
pub async fn sweep_wallet(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
    Json(req): Json<SweepRequest>,
) -> Result<Json<ApiResponse<Vec<crate::service::wallet_service::SweepResult>>>, AppError> {
    if state.registry.get(&req.chain).is_none() {
        return Err(AppError::chain_not_supported(format!(
            "Unsupported chain: {}",
            req.chain
        )));
    }

    let results = state
        .wallet_service
        .transfer_to_master(wallet_id, &req.chain)
        .await?;
    success_response(results)
}

/// GET /wallets/:id — 钱包详情（含解密助记词）
pub async fn get_wallet_details(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<ApiResponse<WalletDetailsResponse>>, AppError> {
    let (wallet, addresses, mnemonic) = state
        .wallet_service
        .wallet_details(wallet_id)
        .await
        .map_err(|e| {
            if format!("{}", e).contains("not found") {
                AppError::wallet_not_found(format!("Wallet not found: {}", wallet_id))
            } else {
                AppError::from(e)
            }
        })?;

    success_response(WalletDetailsResponse {
        wallet,
        addresses,
        mnemonic: mnemonic.to_string(),
    })
}

/// GET /chains — 支持的链列表
pub async fn list_chains(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ListChainsResponse>>, AppError> {
    let mut chains: Vec<ChainInfo> = state
        .registry
        .list_all()
        .into_iter()
        .map(|d| ChainInfo {
            chain: d.chain_key.clone(),
            name: d.name.clone(),
            symbol: d.symbol.clone(),
            decimals: d.decimals,
            minimum_deposit: d.minimum_deposit,
            family: d.family,
        })
        .collect();
    chains.sort_by(|a, b| a.chain.cmp(&b.chain));

    success_response(ListChainsResponse {
        total: chains.len(),
        chains,
    })
}

/// POST /withdrawals — 提现请求
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> Result<Json<ApiResponse<crate::domain::Withdrawal>>, AppError> {
    if state.registry.get(&req.chain).is_none() {
        return Err(AppError::chain_not_supported(format!(
            "Unsupported chain: {}",
            req.chain
        )));
    }
    if req.amount <= Decimal::ZERO {
        return Err(AppError::invalid_amount("Amount must be positive"));
    }

    let withdrawal = state
        .wallet_service
        .request_withdrawal(
            req.user_id,
            req.account_id,
            &req.chain,
            &req.destination,
            req.amount,
        )
        .await
        .map_err(|e| {
            let msg = format!("{:#}", e);
            if msg.contains("Insufficient") {
                AppError::insufficient_balance(msg)
            } else if msg.contains("Invalid destination") {
                AppError::invalid_address(msg)
            } else {
                AppError::internal(msg)
            }
        })?;

    success_response(withdrawal)
}

/// POST /wallets/:id/lock — 锁定钱包（冻结分配/归集/出金与巡检）
pub async fn lock_wallet(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<ApiResponse<crate::domain::HdWallet>>, AppError> {
    set_lock_state(&state, wallet_id, true).await
}

/// POST /wallets/:id/unlock — 解锁钱包
pub async fn unlock_wallet(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
) -> Result<Json<ApiResponse<crate::domain::HdWallet>>, AppError> {
    set_lock_state(&state, wallet_id, false).await
}

async fn set_lock_state(
    state: &AppState,
    wallet_id: Uuid,
    locked: bool,
) -> Result<Json<ApiResponse<crate::domain::HdWallet>>, AppError> {
    if state.wallet_service.find_wallet(wallet_id).await?.is_none() {
        return Err(AppError::wallet_not_found(format!(
            "Wallet not found: {}",
            wallet_id
        )));
    }

    let wallet = state
        .wallet_service
        .set_wallet_locked(wallet_id, locked)
        .await?;
    success_response(wallet)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 返回条数上限，缺省 50
    pub limit: Option<i64>,
}

/// GET /accounts/:id/deposits — 账户充值流水
pub async fn list_account_deposits(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<crate::domain::Deposit>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let deposits = state.deposits.list_by_account(account_id, limit).await?;
    success_response(deposits)
}

/// GET /accounts/:id/withdrawals — 账户提现流水
pub async fn list_account_withdrawals(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<crate::domain::Withdrawal>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let withdrawals = state.withdrawals.list_by_account(account_id, limit).await?;
    success_response(withdrawals)
}

/// GET /healthz — 存活探针
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics — Prometheus 文本导出
pub async fn metrics_endpoint() -> String {
    crate::metrics::render_prometheus()
}
