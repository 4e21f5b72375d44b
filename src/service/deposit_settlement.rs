// 充值清算
//
// 余额增量被确认后的入账流水线：
//   记录充值（CAS，至多一次）→ 取价 → 账本入账 → 终态 → 通知 → 归集
//
// 入账金额始终以链上实际发现的金额为准；申报金额只用于偏差告警。
// 入账一旦成功即为终态，归集失败只批注 metadata，不回滚账本。

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    config::{DepositConfig, SweepConfig},
    domain::{derive_address, BalanceField, ChainRegistry, Deposit, WalletAddress},
    infrastructure::encryption::decrypt_mnemonic,
    metrics,
    repository::{DepositRepository, LedgerRepository, NewDeposit, WalletRepository},
    service::{
        notification_service::{NotificationCategory, NotificationService},
        price_service::PriceService,
        transaction_executor::{TransactionExecutor, TransferRequest},
    },
};

/// 监控层观察到的余额增量
#[derive(Debug, Clone)]
pub struct DetectedIncrease {
    pub address: WalletAddress,
    /// 链上最新已确认余额
    pub new_balance: Decimal,
    /// 用户预先申报的金额（如有）
    pub intended_amount: Option<Decimal>,
}

/// 余额增量是否触发入账：必须严格大于链的最小充值门槛
fn clears_deposit_threshold(delta: Decimal, minimum: Decimal) -> bool {
    delta > minimum
}

pub struct DepositSettlement {
    wallets: WalletRepository,
    deposits: DepositRepository,
    ledger: LedgerRepository,
    prices: Arc<PriceService>,
    notifications: NotificationService,
    executor: Arc<TransactionExecutor>,
    registry: Arc<ChainRegistry>,
    deposit_config: DepositConfig,
    sweep_config: SweepConfig,
    /// chain → 平台托管地址
    custody_addresses: HashMap<String, String>,
    encryption_key: Arc<Vec<u8>>,
}

impl DepositSettlement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallets: WalletRepository,
        deposits: DepositRepository,
        ledger: LedgerRepository,
        prices: Arc<PriceService>,
        notifications: NotificationService,
        executor: Arc<TransactionExecutor>,
        registry: Arc<ChainRegistry>,
        deposit_config: DepositConfig,
        sweep_config: SweepConfig,
        custody_addresses: HashMap<String, String>,
        encryption_key: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            wallets,
            deposits,
            ledger,
            prices,
            notifications,
            executor,
            registry,
            deposit_config,
            sweep_config,
            custody_addresses,
            encryption_key,
        }
    }

    /// 清算一笔检测到的余额增量
    ///
    /// 返回 Ok(None) 表示该增量已被并发周期处理或低于入账门槛。
    pub async fn settle(&self, increase: DetectedIncrease) -> Result<Option<Deposit>> {
        let address = &increase.address;
        let delta = increase.new_balance - address.balance;

        let descriptor = self
            .registry
            .get(&address.chain)
            .with_context(|| format!("Unsupported chain: {}", address.chain))?;

        if !clears_deposit_threshold(delta, descriptor.minimum_deposit) {
            tracing::debug!(
                chain = %address.chain,
                address = %address.address,
                delta = %delta,
                minimum = %descriptor.minimum_deposit,
                "Balance increase below deposit threshold, skipping"
            );
            return Ok(None);
        }

        let wallet = self
            .wallets
            .find_by_id(address.wallet_id)
            .await?
            .with_context(|| format!("Wallet not found for address {}", address.id))?;

        let account = self.ledger.get_account(wallet.account_id).await?;
        let user_id = account
            .map(|a| a.user_id)
            .unwrap_or(wallet.account_id);
        self.ledger.ensure_account(wallet.account_id, user_id).await?;

        // 至多一次：余额 CAS + 充值行在同一事务
        let new_deposit = NewDeposit {
            user_id,
            account_id: wallet.account_id,
            address_id: address.id,
            chain: address.chain.clone(),
            asset: descriptor.symbol.clone(),
            intended_amount: increase.intended_amount,
            crypto_amount: delta,
            observed_old_balance: address.balance,
            observed_new_balance: increase.new_balance,
            metadata: json!({}),
        };

        let deposit = match self.deposits.record_detected(new_deposit).await? {
            Some(deposit) => deposit,
            None => {
                tracing::debug!(
                    address = %address.address,
                    "Deposit already recorded by a concurrent cycle"
                );
                return Ok(None);
            }
        };
        metrics::count_deposit_detected(&address.chain);

        tracing::info!(
            deposit_id = %deposit.id,
            chain = %address.chain,
            address = %address.address,
            amount = %delta,
            "Deposit detected, crediting ledger"
        );

        // 取价失败即清算失败，绝不使用陈价入账
        let price = match self.prices.get_price(&descriptor.symbol).await {
            Ok(price) => price,
            Err(e) => {
                self.fail_settlement(&deposit, &format!("Price lookup failed: {:#}", e))
                    .await;
                return Err(e).context("Settlement aborted: price unavailable");
            }
        };

        let usd_value = (delta * price * self.deposit_config.credit_buffer).round_dp(8);

        if let Err(e) = self.credit_ledger(wallet.account_id, usd_value).await {
            self.fail_settlement(&deposit, &format!("Ledger credit failed: {:#}", e))
                .await;
            return Err(e).context("Settlement aborted: ledger credit failed");
        }

        let metadata_patch = json!({
            "price_usdt": price.to_string(),
            "credit_buffer": self.deposit_config.credit_buffer.to_string(),
            "credited_usd": usd_value.to_string(),
        });
        self.deposits
            .mark_completed(deposit.id, usd_value, metadata_patch)
            .await?;
        metrics::count_deposit_settled(&address.chain);

        // 申报金额偏差告警（入账金额不受影响）
        if let Some(intended) = increase.intended_amount {
            if self.is_mismatch(intended, delta) {
                metrics::count_deposit_mismatch();
                self.notifications
                    .notify_best_effort(
                        Some(user_id),
                        NotificationCategory::DepositMismatch,
                        "充值金额与申报不符",
                        json!({
                            "deposit_id": deposit.id,
                            "intended_amount": intended.to_string(),
                            "discovered_amount": delta.to_string(),
                        }),
                    )
                    .await;
            }
        }

        self.notifications
            .notify_best_effort(
                Some(user_id),
                NotificationCategory::DepositConfirmed,
                "充值已入账",
                json!({
                    "deposit_id": deposit.id,
                    "chain": address.chain,
                    "amount": delta.to_string(),
                    "credited_usd": usd_value.to_string(),
                }),
            )
            .await;

        // 尽力而为的归集，单次尝试，结果批注回 metadata
        if self.sweep_config.auto_sweep_enabled && delta >= self.sweep_config.minimum_sweep_amount {
            self.sweep_best_effort(&wallet.encrypted_seed, address, &deposit, delta)
                .await;
        }

        Ok(Some(deposit))
    }

    /// 申报/发现偏差是否超过容忍度
    fn is_mismatch(&self, intended: Decimal, discovered: Decimal) -> bool {
        if intended <= Decimal::ZERO {
            return false;
        }
        let deviation = ((discovered - intended) / intended).abs();
        deviation > self.deposit_config.mismatch_tolerance
    }

    async fn credit_ledger(&self, account_id: uuid::Uuid, usd_value: Decimal) -> Result<()> {
        self.ledger
            .credit(account_id, BalanceField::Total, usd_value)
            .await?;
        self.ledger
            .credit(account_id, BalanceField::Available, usd_value)
            .await?;
        self.ledger
            .credit(account_id, BalanceField::Crypto, usd_value)
            .await?;
        Ok(())
    }

    /// 清算失败落终态并升级给管理员
    async fn fail_settlement(&self, deposit: &Deposit, reason: &str) {
        if let Err(e) = self.deposits.mark_failed(deposit.id, reason).await {
            tracing::error!(deposit_id = %deposit.id, error = %e, "Failed to mark deposit failed");
        }
        self.notifications
            .notify_best_effort(
                None,
                NotificationCategory::AdminAlert,
                "充值清算失败，需人工处理",
                json!({"deposit_id": deposit.id, "reason": reason}),
            )
            .await;
    }

    /// 单次归集尝试，失败只记录不重试
    async fn sweep_best_effort(
        &self,
        encrypted_seed: &str,
        address: &WalletAddress,
        deposit: &Deposit,
        amount: Decimal,
    ) {
        let result = self.sweep_to_custody(encrypted_seed, address, amount).await;

        let annotation = match &result {
            Ok(tx_hash) => json!({"sweep": {"status": "sent", "tx_hash": tx_hash}}),
            Err(e) => {
                metrics::count_sweep_failed();
                tracing::warn!(
                    deposit_id = %deposit.id,
                    address = %address.address,
                    error = %e,
                    "Sweep attempt failed"
                );
                json!({"sweep": {"status": "failed", "reason": format!("{:#}", e)}})
            }
        };

        if let Err(e) = self.deposits.annotate(deposit.id, annotation).await {
            tracing::error!(deposit_id = %deposit.id, error = %e, "Failed to annotate sweep result");
        }
    }

    async fn sweep_to_custody(
        &self,
        encrypted_seed: &str,
        address: &WalletAddress,
        amount: Decimal,
    ) -> Result<String> {
        let custody = self
            .custody_addresses
            .get(&address.chain)
            .with_context(|| format!("No custody address configured for {}", address.chain))?;

        let descriptor = self
            .registry
            .get(&address.chain)
            .with_context(|| format!("Unsupported chain: {}", address.chain))?;

        if self.sweep_config.sweep_delay_secs > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(
                self.sweep_config.sweep_delay_secs,
            ))
            .await;
        }

        let mnemonic = decrypt_mnemonic(encrypted_seed, &self.encryption_key)
            .context("Failed to decrypt wallet seed for sweep")?;
        let derived = derive_address(&mnemonic, descriptor, address.address_index as u32)?;

        if derived.address.to_lowercase() != address.address.to_lowercase() {
            anyhow::bail!(
                "Derivation drift: expected {}, derived {}",
                address.address,
                derived.address
            );
        }

        // 留出网络费，剩余全额归集
        let fee = self
            .executor
            .estimate_fee(&address.chain)
            .await
            .map_err(|e| anyhow::anyhow!("Fee estimation failed: {}", e))?;
        let sweep_amount = amount - fee;
        if sweep_amount <= Decimal::ZERO {
            anyhow::bail!("Deposit {} too small to cover sweep fee {}", amount, fee);
        }

        let outcome = self
            .executor
            .execute_transfer(&TransferRequest {
                chain: address.chain.clone(),
                from_address: address.address.clone(),
                signing_key: derived.signing_key.clone(),
                to_address: custody.clone(),
                amount: sweep_amount,
            })
            .await
            .map_err(|e| anyhow::anyhow!("Sweep transfer failed: {}", e))?;

        Ok(outcome.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DepositConfig {
        DepositConfig::default()
    }

    #[test]
    fn test_deposit_threshold_is_strict() {
        let minimum = Decimal::new(1, 2); // 0.01

        // 等于门槛不入账，只有严格大于才触发
        assert!(!clears_deposit_threshold(Decimal::new(1, 2), minimum));
        assert!(!clears_deposit_threshold(Decimal::new(9, 3), minimum));
        assert!(clears_deposit_threshold(Decimal::new(11, 3), minimum));
    }

    #[test]
    fn test_mismatch_tolerance() {
        let config = test_config();

        // 1% 容忍度内不告警
        let intended = Decimal::new(100, 0);
        let within = Decimal::new(1005, 1); // 100.5, +0.5%
        let deviation = ((within - intended) / intended).abs();
        assert!(deviation <= config.mismatch_tolerance);

        // 超出 1% 告警
        let outside = Decimal::new(103, 0); // +3%
        let deviation = ((outside - intended) / intended).abs();
        assert!(deviation > config.mismatch_tolerance);
    }

    #[test]
    fn test_credit_buffer_math() {
        let config = test_config();
        let delta = Decimal::new(2, 0); // 2 ETH
        let price = Decimal::new(3000, 0);

        let usd = (delta * price * config.credit_buffer).round_dp(8);
        assert_eq!(usd, Decimal::new(5700, 0)); // 2 * 3000 * 0.95
    }
}
