//! 领域层：链注册表、派生策略、核心记录类型

pub mod chain_registry;
pub mod derivation;
pub mod models;

pub use chain_registry::{ChainDescriptor, ChainFamily, ChainRegistry};
pub use derivation::{derive_address, strategy_for, DerivedAddress};
pub use models::{
    BalanceField, Deposit, DepositStatus, HdWallet, WalletAddress, Withdrawal, WithdrawalStatus,
};
