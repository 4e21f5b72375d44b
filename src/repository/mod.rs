//! 数据访问层：raw SQL + sqlx

pub mod deposit_repository;
pub mod ledger_repository;
pub mod wallet_repository;
pub mod withdrawal_repository;

pub use deposit_repository::{DepositRepository, NewDeposit};
pub use ledger_repository::{AccountBalances, LedgerRepository};
pub use wallet_repository::{NewAddress, WalletRepository};
pub use withdrawal_repository::{NewWithdrawal, WithdrawalRepository};
