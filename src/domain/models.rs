//! 钱包/清算核心记录类型
//!
//! 与数据库行一一对应（sqlx::FromRow）。状态字段以 TEXT 存储，
//! 状态机转换通过枚举的 as_str/parse 保持一致。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HD 钱包聚合根
///
/// 每个账户创建一次（由钱包开通任务负责），持有加密种子与
/// 单调递增的地址索引计数器。只被地址分配与锁定/解锁操作修改。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HdWallet {
    pub id: Uuid,
    pub account_id: Uuid,
    /// AES-256-GCM 加密的助记词 (hex)
    #[serde(skip_serializing)]
    pub encrypted_seed: String,
    /// 已分配的最高地址索引，-1 表示尚未分配
    pub last_address_index: i64,
    pub is_active: bool,
    pub is_locked: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HdWallet {
    /// 钱包是否可用于分配地址与归集
    pub fn is_operable(&self) -> bool {
        self.is_active && !self.is_locked
    }
}

/// 充值地址
///
/// `balance` 字段是充值监控 diff 的唯一事实来源；仅由充值监控
/// 与交易执行器（归集/提现后重新同步）修改。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletAddress {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub chain: String,
    pub address: String,
    pub address_index: i64,
    pub derivation_path: String,
    /// 代币地址（可选，原生币为 None）
    pub asset: Option<String>,
    /// 最近一次确认的链上余额（整币单位）
    pub balance: Decimal,
    pub is_used: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 充值状态机: pending → processing → completed | failed | cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Processing => "processing",
            DepositStatus::Completed => "completed",
            DepositStatus::Failed => "failed",
            DepositStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositStatus::Completed | DepositStatus::Failed | DepositStatus::Cancelled
        )
    }
}

/// 充值记录
///
/// 余额增量被首次观察到时创建；只有账本入账成功后才进入
/// `completed`，此后除 metadata 批注外不可变。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub address_id: Uuid,
    pub chain: String,
    pub asset: String,
    /// 用户预先申报的金额（如有）
    pub intended_amount: Option<Decimal>,
    /// 链上实际发现的金额
    pub crypto_amount: Decimal,
    pub usd_value: Option<Decimal>,
    pub status: String,
    pub confirmations: i64,
    /// 换算价格、折价系数、归集结果等批注
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 提现状态机: pending → processing → sent → completed | failed | cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Sent,
    Completed,
    Failed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Sent => "sent",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled
        )
    }
}

/// 提现记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub chain: String,
    pub asset: String,
    pub destination: String,
    pub requested_amount: Decimal,
    pub network_fee: Option<Decimal>,
    pub platform_fee: Decimal,
    pub final_amount: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub status: String,
    pub approval_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 账本余额字段（外部账本接口的原子增减目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceField {
    Total,
    Available,
    Invested,
    Crypto,
}

impl BalanceField {
    /// 对应的 accounts 表列名（白名单，杜绝动态拼接）
    pub fn column(&self) -> &'static str {
        match self {
            BalanceField::Total => "total_balance",
            BalanceField::Available => "available_balance",
            BalanceField::Invested => "invested_balance",
            BalanceField::Crypto => "crypto_balance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_status_terminal() {
        assert!(!DepositStatus::Pending.is_terminal());
        assert!(!DepositStatus::Processing.is_terminal());
        assert!(DepositStatus::Completed.is_terminal());
        assert!(DepositStatus::Failed.is_terminal());
    }

    #[test]
    fn test_withdrawal_status_roundtrip() {
        assert_eq!(WithdrawalStatus::Sent.as_str(), "sent");
        assert!(WithdrawalStatus::Cancelled.is_terminal());
        assert!(!WithdrawalStatus::Sent.is_terminal());
    }

    #[test]
    fn test_balance_field_columns() {
        assert_eq!(BalanceField::Total.column(), "total_balance");
        assert_eq!(BalanceField::Crypto.column(), "crypto_balance");
    }
}
