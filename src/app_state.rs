//! 应用状态：所有共享资源在启动时装配一次，按句柄传递

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    config::Config,
    domain::ChainRegistry,
    infrastructure::{db::PgPool, encryption::get_encryption_key, provider_registry::ChainProviderRegistry},
    repository::{
        DepositRepository, LedgerRepository, WalletRepository, WithdrawalRepository,
    },
    service::{
        BalanceChecker, DepositMonitor, DepositSettlement, NotificationService, PriceService,
        TransactionExecutor, WalletProvisioning, WalletService,
    },
};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub registry: Arc<ChainRegistry>,
    pub wallet_service: WalletService,
    pub provisioning: Arc<WalletProvisioning>,
    pub monitor: Arc<DepositMonitor>,
    pub price_service: Arc<PriceService>,
    pub deposits: DepositRepository,
    pub withdrawals: WithdrawalRepository,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<Config>) -> Result<Self> {
        let registry = Arc::new(ChainRegistry::new());
        registry
            .validate()
            .map_err(|errors| anyhow::anyhow!("Chain registry invalid: {}", errors.join("; ")))?;

        let providers = Arc::new(ChainProviderRegistry::new(&config.chains));
        let checker = Arc::new(BalanceChecker::new(Arc::clone(&providers), Arc::clone(&registry)));
        let executor = Arc::new(TransactionExecutor::new(
            Arc::clone(&providers),
            Arc::clone(&registry),
        ));
        let price_service = Arc::new(PriceService::new(pool.clone()));
        let notifications = NotificationService::new(pool.clone());

        let wallets = WalletRepository::new(pool.clone());
        let deposits = DepositRepository::new(pool.clone());
        let ledger = LedgerRepository::new(pool.clone());
        let withdrawals = WithdrawalRepository::new(pool.clone());

        let encryption_key =
            Arc::new(get_encryption_key().context("Wallet encryption key unavailable")?);

        let custody_addresses: HashMap<String, String> = config
            .chains
            .iter()
            .map(|(chain, endpoint)| (chain.to_lowercase(), endpoint.custody_address.clone()))
            .collect();

        let wallet_service = WalletService::new(
            wallets.clone(),
            withdrawals.clone(),
            ledger.clone(),
            Arc::clone(&checker),
            Arc::clone(&executor),
            Arc::clone(&price_service),
            notifications.clone(),
            Arc::clone(&registry),
            config.sweep.clone(),
            custody_addresses.clone(),
            Arc::clone(&encryption_key),
        );

        let settlement = Arc::new(DepositSettlement::new(
            wallets.clone(),
            deposits.clone(),
            ledger,
            Arc::clone(&price_service),
            notifications.clone(),
            Arc::clone(&executor),
            Arc::clone(&registry),
            config.deposit.clone(),
            config.sweep.clone(),
            custody_addresses,
            encryption_key,
        ));

        let monitor = Arc::new(DepositMonitor::new(
            wallets,
            checker,
            settlement,
            Arc::clone(&registry),
        ));

        let provisioning = Arc::new(WalletProvisioning::new(
            wallet_service.clone(),
            notifications,
            config.provisioning.clone(),
        ));

        Ok(Self {
            pool,
            config,
            registry,
            wallet_service,
            provisioning,
            monitor,
            price_service,
            deposits,
            withdrawals,
        })
    }
}
