//! 业务服务层

pub mod balance_checker;
pub mod deposit_monitor;
pub mod deposit_settlement;
pub mod notification_service;
pub mod price_service;
pub mod transaction_executor;
pub mod wallet_provisioning;
pub mod wallet_service;

pub use balance_checker::BalanceChecker;
pub use deposit_monitor::DepositMonitor;
pub use deposit_settlement::DepositSettlement;
pub use notification_service::NotificationService;
pub use price_service::PriceService;
pub use transaction_executor::TransactionExecutor;
pub use wallet_provisioning::WalletProvisioning;
pub use wallet_service::WalletService;
