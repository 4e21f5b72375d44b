// 钱包服务
//
// HD 钱包生命周期的编排层：助记词生成与加密入库、地址分配
// （CAS 防并发重号）、余额查询、手动归集与提现。私钥只在单次
// 签名操作内解包，从不出现在返回值与日志中。

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use bip39::{Language, Mnemonic};
use rand::RngCore;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    config::SweepConfig,
    domain::{
        derive_address, strategy_for, BalanceField, ChainRegistry, HdWallet, WalletAddress,
        Withdrawal, WithdrawalStatus,
    },
    infrastructure::encryption::{decrypt_mnemonic, encrypt_mnemonic},
    repository::{
        LedgerRepository, NewAddress, NewWithdrawal, WalletRepository, WithdrawalRepository,
    },
    service::{
        balance_checker::BalanceChecker,
        notification_service::NotificationService,
        price_service::PriceService,
        transaction_executor::{TransactionExecutor, TransferRequest},
    },
};

/// 地址分配 CAS 重试上限
const INDEX_ALLOC_MAX_RETRIES: u32 = 8;

/// sent 状态提现的链上确认轮询：30 次 × 10 秒，约 5 分钟窗口
const WITHDRAWAL_CONFIRM_ATTEMPTS: u32 = 30;
const WITHDRAWAL_CONFIRM_INTERVAL_SECS: u64 = 10;

/// 单地址归集结果
#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepResult {
    pub address: String,
    pub tx_hash: Option<String>,
    pub swept_amount: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct WalletService {
    wallets: WalletRepository,
    withdrawals: WithdrawalRepository,
    ledger: LedgerRepository,
    checker: Arc<BalanceChecker>,
    executor: Arc<TransactionExecutor>,
    prices: Arc<PriceService>,
    notifications: NotificationService,
    registry: Arc<ChainRegistry>,
    sweep_config: SweepConfig,
    custody_addresses: HashMap<String, String>,
    encryption_key: Arc<Vec<u8>>,
}

impl WalletService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallets: WalletRepository,
        withdrawals: WithdrawalRepository,
        ledger: LedgerRepository,
        checker: Arc<BalanceChecker>,
        executor: Arc<TransactionExecutor>,
        prices: Arc<PriceService>,
        notifications: NotificationService,
        registry: Arc<ChainRegistry>,
        sweep_config: SweepConfig,
        custody_addresses: HashMap<String, String>,
        encryption_key: Arc<Vec<u8>>,
    ) -> Self {
        Self {
            wallets,
            withdrawals,
            ledger,
            checker,
            executor,
            prices,
            notifications,
            registry,
            sweep_config,
            custody_addresses,
            encryption_key,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// 生成 24 词 BIP39 助记词（256 位熵，OsRng）
    fn generate_mnemonic() -> Result<Zeroizing<String>> {
        let mut entropy = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(entropy.as_mut());
        let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy.as_ref())
            .context("Failed to generate mnemonic")?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    /// 创建 HD 钱包（种子生成 + 加密入库）
    ///
    /// account_id 唯一约束保证重复调用失败而不是生成第二个种子。
    pub async fn create_wallet(&self, account_id: Uuid, user_id: Uuid) -> Result<HdWallet> {
        self.ledger.ensure_account(account_id, user_id).await?;

        if let Some(existing) = self.wallets.find_by_account(account_id).await? {
            tracing::debug!(account_id = %account_id, "Wallet already exists for account");
            return Ok(existing);
        }

        let mnemonic = Self::generate_mnemonic()?;
        let encrypted = encrypt_mnemonic(&mnemonic, &self.encryption_key)?;

        let wallet = self.wallets.create_wallet(account_id, &encrypted).await?;

        tracing::info!(
            wallet_id = %wallet.id,
            account_id = %account_id,
            "HD wallet created"
        );
        Ok(wallet)
    }

    /// 派生自检：每个链家族各派生一次索引 0，确认种子可用
    pub async fn verify_wallet(&self, wallet: &HdWallet) -> Result<()> {
        let mnemonic = decrypt_mnemonic(&wallet.encrypted_seed, &self.encryption_key)?;

        for descriptor in self.registry.list_all() {
            let derived = derive_address(&mnemonic, descriptor, 0)?;
            if !strategy_for(descriptor.family).validate_address(&derived.address) {
                anyhow::bail!(
                    "Derivation self-check failed for chain {}",
                    descriptor.chain_key
                );
            }
        }

        self.wallets.mark_verified(wallet.id).await?;
        Ok(())
    }

    /// 为钱包在指定链上分配充值地址
    ///
    /// 钱包内所有链共享一个单调递增的索引计数器；同一 (链, 索引)
    /// 至多落库一次。已有未使用地址时直接复用，不浪费索引。
    pub async fn allocate_address(&self, wallet_id: Uuid, chain: &str) -> Result<WalletAddress> {
        let descriptor = self
            .registry
            .get(chain)
            .with_context(|| format!("Unsupported chain: {}", chain))?;

        let wallet = self
            .wallets
            .find_by_id(wallet_id)
            .await?
            .with_context(|| format!("Wallet not found: {}", wallet_id))?;
        if !wallet.is_operable() {
            anyhow::bail!("Wallet {} is locked or inactive", wallet_id);
        }

        if let Some(existing) = self.wallets.find_unused_address(wallet_id, chain).await? {
            return Ok(existing);
        }

        let mnemonic = decrypt_mnemonic(&wallet.encrypted_seed, &self.encryption_key)?;

        // 派生先行、单事务落位（地址行 + 索引推进一起提交或一起
        // 回滚），抢不到索引就重读重派生
        for attempt in 0..INDEX_ALLOC_MAX_RETRIES {
            let current = self
                .wallets
                .find_by_id(wallet_id)
                .await?
                .with_context(|| format!("Wallet not found: {}", wallet_id))?;
            let next_index = current.last_address_index + 1;

            let derived = derive_address(&mnemonic, descriptor, next_index as u32)?;

            let allocated = self
                .wallets
                .insert_address_with_index(
                    NewAddress {
                        wallet_id,
                        chain: descriptor.chain_key.clone(),
                        address: derived.address.clone(),
                        address_index: next_index,
                        derivation_path: derived.path.clone(),
                        asset: None,
                    },
                    current.last_address_index,
                )
                .await?;

            if let Some(address) = allocated {
                tracing::info!(
                    wallet_id = %wallet_id,
                    chain = %chain,
                    address = %address.address,
                    index = next_index,
                    "Deposit address allocated"
                );
                return Ok(address);
            }

            tracing::debug!(
                wallet_id = %wallet_id,
                attempt,
                "Index allocation lost race, retrying"
            );
        }

        anyhow::bail!(
            "Failed to allocate address index after {} attempts",
            INDEX_ALLOC_MAX_RETRIES
        )
    }

    /// 钱包详情（含解密助记词，调用方必须已完成二次认证）
    pub async fn wallet_details(
        &self,
        wallet_id: Uuid,
    ) -> Result<(HdWallet, Vec<WalletAddress>, Zeroizing<String>)> {
        let wallet = self
            .wallets
            .find_by_id(wallet_id)
            .await?
            .with_context(|| format!("Wallet not found: {}", wallet_id))?;
        let addresses = self.wallets.list_addresses(wallet_id).await?;
        let mnemonic =
            Zeroizing::new(decrypt_mnemonic(&wallet.encrypted_seed, &self.encryption_key)?);
        Ok((wallet, addresses, mnemonic))
    }

    pub async fn find_wallet(&self, wallet_id: Uuid) -> Result<Option<HdWallet>> {
        self.wallets.find_by_id(wallet_id).await
    }

    pub async fn find_wallet_by_account(&self, account_id: Uuid) -> Result<Option<HdWallet>> {
        self.wallets.find_by_account(account_id).await
    }

    /// 锁定/解锁钱包
    ///
    /// 锁定立即生效：地址分配、归集与提现出金被拒绝，充值巡检
    /// 不再覆盖该钱包的地址。
    pub async fn set_wallet_locked(&self, wallet_id: Uuid, locked: bool) -> Result<HdWallet> {
        let wallet = self
            .wallets
            .find_by_id(wallet_id)
            .await?
            .with_context(|| format!("Wallet not found: {}", wallet_id))?;

        self.wallets.set_locked(wallet_id, locked).await?;
        tracing::info!(
            wallet_id = %wallet_id,
            locked,
            "Wallet lock state changed"
        );

        Ok(HdWallet {
            is_locked: locked,
            ..wallet
        })
    }

    /// 实时链上余额查询
    pub async fn check_balance(
        &self,
        chain: &str,
        address: &str,
        token: Option<(&str, u32)>,
    ) -> Result<Decimal> {
        match token {
            Some((contract, decimals)) => {
                self.checker
                    .token_balance(chain, address, contract, decimals)
                    .await
            }
            None => self.checker.confirmed_balance(chain, address).await,
        }
    }

    /// 手动归集：把钱包在指定链上的全部可用余额转到托管地址
    pub async fn transfer_to_master(&self, wallet_id: Uuid, chain: &str) -> Result<Vec<SweepResult>> {
        let descriptor = self
            .registry
            .get(chain)
            .with_context(|| format!("Unsupported chain: {}", chain))?;

        let wallet = self
            .wallets
            .find_by_id(wallet_id)
            .await?
            .with_context(|| format!("Wallet not found: {}", wallet_id))?;
        if !wallet.is_operable() {
            anyhow::bail!("Wallet {} is locked or inactive", wallet_id);
        }

        let custody = self
            .custody_addresses
            .get(chain)
            .with_context(|| format!("No custody address configured for {}", chain))?;

        let mnemonic = decrypt_mnemonic(&wallet.encrypted_seed, &self.encryption_key)?;

        let mut results = Vec::new();
        for address in self.wallets.list_addresses(wallet_id).await? {
            if address.chain != descriptor.chain_key
                || address.balance < self.sweep_config.minimum_sweep_amount
            {
                continue;
            }

            let outcome = async {
                let derived =
                    derive_address(&mnemonic, descriptor, address.address_index as u32)?;
                let fee = self
                    .executor
                    .estimate_fee(chain)
                    .await
                    .map_err(|e| anyhow::anyhow!("Fee estimation failed: {}", e))?;
                let amount = address.balance - fee;
                if amount <= Decimal::ZERO {
                    anyhow::bail!("Balance {} cannot cover fee {}", address.balance, fee);
                }

                let outcome = self
                    .executor
                    .execute_transfer(&TransferRequest {
                        chain: chain.to_string(),
                        from_address: address.address.clone(),
                        signing_key: derived.signing_key.clone(),
                        to_address: custody.clone(),
                        amount,
                    })
                    .await
                    .map_err(|e| anyhow::anyhow!("Sweep transfer failed: {}", e))?;
                Ok::<_, anyhow::Error>((outcome.tx_hash, amount))
            }
            .await;

            results.push(match outcome {
                Ok((tx_hash, amount)) => SweepResult {
                    address: address.address.clone(),
                    tx_hash: Some(tx_hash),
                    swept_amount: Some(amount),
                    error: None,
                },
                Err(e) => SweepResult {
                    address: address.address.clone(),
                    tx_hash: None,
                    swept_amount: None,
                    error: Some(format!("{:#}", e)),
                },
            });
        }

        Ok(results)
    }

    /// 提现请求：校验 → 账本预扣 → 落单 → 后台执行
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        chain: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        let descriptor = self
            .registry
            .get(chain)
            .with_context(|| format!("Unsupported chain: {}", chain))?;

        if amount <= Decimal::ZERO {
            anyhow::bail!("Withdrawal amount must be positive");
        }
        if !strategy_for(descriptor.family).validate_address(destination) {
            anyhow::bail!("Invalid destination address for {}: {}", chain, destination);
        }

        let platform_fee = descriptor.fee_policy.platform_fee;
        let price = self.prices.get_price(&descriptor.symbol).await?;
        let usd_value = ((amount + platform_fee) * price).round_dp(8);

        // 可用余额预扣，失败即拒单
        let debited = self
            .ledger
            .debit(account_id, BalanceField::Available, usd_value)
            .await?;
        if !debited {
            anyhow::bail!("Insufficient available balance for withdrawal");
        }

        let withdrawal = match self
            .withdrawals
            .create(NewWithdrawal {
                user_id,
                account_id,
                chain: descriptor.chain_key.clone(),
                asset: descriptor.symbol.clone(),
                destination: destination.to_string(),
                requested_amount: amount,
                platform_fee,
            })
            .await
        {
            Ok(w) => w,
            Err(e) => {
                // 落单失败必须退回预扣
                let _ = self
                    .ledger
                    .credit(account_id, BalanceField::Available, usd_value)
                    .await;
                return Err(e);
            }
        };

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            chain = %chain,
            amount = %amount,
            "Withdrawal accepted, executing in background"
        );

        let service = self.clone();
        let withdrawal_id = withdrawal.id;
        tokio::spawn(async move {
            if let Err(e) = service.execute_withdrawal(withdrawal_id, usd_value).await {
                tracing::error!(
                    withdrawal_id = %withdrawal_id,
                    error = %e,
                    "Withdrawal execution failed"
                );
            }
        });

        Ok(withdrawal)
    }

    /// 提现的链上执行（后台任务）
    async fn execute_withdrawal(&self, withdrawal_id: Uuid, reserved_usd: Decimal) -> Result<()> {
        let withdrawal = self
            .withdrawals
            .find_by_id(withdrawal_id)
            .await?
            .with_context(|| format!("Withdrawal not found: {}", withdrawal_id))?;

        self.withdrawals
            .set_status(withdrawal_id, WithdrawalStatus::Processing)
            .await?;

        let result = self.broadcast_withdrawal(&withdrawal).await;

        match result {
            Ok((tx_hash, network_fee, confirmed)) => {
                self.withdrawals
                    .mark_sent(withdrawal_id, &tx_hash, Some(network_fee))
                    .await?;
                if confirmed {
                    self.withdrawals
                        .mark_completed(withdrawal_id, withdrawal.requested_amount, Some(network_fee))
                        .await?;
                } else {
                    self.confirm_sent_withdrawal(&withdrawal, &tx_hash, network_fee, reserved_usd)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                // 执行失败退回预扣
                self.withdrawals
                    .mark_failed(withdrawal_id, &format!("{:#}", e))
                    .await?;
                self.ledger
                    .credit(withdrawal.account_id, BalanceField::Available, reserved_usd)
                    .await?;
                self.notifications
                    .notify_best_effort(
                        Some(withdrawal.user_id),
                        crate::service::notification_service::NotificationCategory::AdminAlert,
                        "提现执行失败，已退回余额",
                        json!({"withdrawal_id": withdrawal_id, "reason": format!("{:#}", e)}),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// sent 状态的链上确认跟进
    ///
    /// 广播未即时确认时有界轮询交易状态：确认则完结，链上失败
    /// 则退款，窗口耗尽则升级给管理员（保持 sent 待人工核对，
    /// 绝不自动重发）。
    async fn confirm_sent_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        tx_hash: &str,
        network_fee: Decimal,
        reserved_usd: Decimal,
    ) -> Result<()> {
        for _ in 0..WITHDRAWAL_CONFIRM_ATTEMPTS {
            tokio::time::sleep(std::time::Duration::from_secs(
                WITHDRAWAL_CONFIRM_INTERVAL_SECS,
            ))
            .await;

            match self
                .executor
                .transaction_status(&withdrawal.chain, tx_hash)
                .await
            {
                Ok(crate::service::transaction_executor::OnchainStatus::Confirmed) => {
                    self.withdrawals
                        .mark_completed(
                            withdrawal.id,
                            withdrawal.requested_amount,
                            Some(network_fee),
                        )
                        .await?;
                    return Ok(());
                }
                Ok(crate::service::transaction_executor::OnchainStatus::Failed) => {
                    self.withdrawals
                        .mark_failed(withdrawal.id, "Transaction reverted on chain")
                        .await?;
                    self.ledger
                        .credit(withdrawal.account_id, BalanceField::Available, reserved_usd)
                        .await?;
                    return Ok(());
                }
                Ok(crate::service::transaction_executor::OnchainStatus::Unknown) => {}
                Err(e) => {
                    tracing::warn!(
                        withdrawal_id = %withdrawal.id,
                        error = %e,
                        "Withdrawal status check failed, will retry"
                    );
                }
            }
        }

        tracing::warn!(
            withdrawal_id = %withdrawal.id,
            tx_hash = %tx_hash,
            "Withdrawal unconfirmed after polling window, escalating"
        );
        self.notifications
            .notify_best_effort(
                Some(withdrawal.user_id),
                crate::service::notification_service::NotificationCategory::AdminAlert,
                "提现广播后长时间未确认，需人工核对",
                json!({"withdrawal_id": withdrawal.id, "tx_hash": tx_hash}),
            )
            .await;
        Ok(())
    }

    /// 从账户自有充值地址出金
    async fn broadcast_withdrawal(
        &self,
        withdrawal: &Withdrawal,
    ) -> Result<(String, Decimal, bool)> {
        let descriptor = self
            .registry
            .get(&withdrawal.chain)
            .with_context(|| format!("Unsupported chain: {}", withdrawal.chain))?;

        let wallet = self
            .wallets
            .find_by_account(withdrawal.account_id)
            .await?
            .with_context(|| format!("No wallet for account {}", withdrawal.account_id))?;
        if !wallet.is_operable() {
            anyhow::bail!("Wallet {} is locked or inactive", wallet.id);
        }

        let fee_estimate = self
            .executor
            .estimate_fee(&withdrawal.chain)
            .await
            .map_err(|e| anyhow::anyhow!("Fee estimation failed: {}", e))?;
        let required = withdrawal.requested_amount + fee_estimate;

        // 资金来源：该链上余额足以覆盖金额+网络费的充值地址
        let funding = self
            .wallets
            .list_addresses(wallet.id)
            .await?
            .into_iter()
            .filter(|a| a.chain == descriptor.chain_key)
            .find(|a| a.balance >= required)
            .with_context(|| {
                format!(
                    "No funded address on {} can cover {} plus fees",
                    withdrawal.chain, withdrawal.requested_amount
                )
            })?;

        let mnemonic = decrypt_mnemonic(&wallet.encrypted_seed, &self.encryption_key)?;
        let derived = derive_address(&mnemonic, descriptor, funding.address_index as u32)?;

        let outcome = self
            .executor
            .execute_transfer(&TransferRequest {
                chain: withdrawal.chain.clone(),
                from_address: funding.address.clone(),
                signing_key: derived.signing_key.clone(),
                to_address: withdrawal.destination.clone(),
                amount: withdrawal.requested_amount,
            })
            .await;

        match outcome {
            Ok(o) => Ok((o.tx_hash, o.network_fee, o.confirmed)),
            Err(e) if e.is_retryable() => {
                // 瞬态失败：这里不知道交易是否已进入内存池，
                // 不能直接换 nonce 重试，交人工处理
                anyhow::bail!("Broadcast outcome unknown, manual review required: {}", e)
            }
            Err(e) => anyhow::bail!("Withdrawal transfer rejected: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_mnemonic_valid() {
        let mnemonic = WalletService::generate_mnemonic().unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 24);
        assert!(Mnemonic::parse_in(Language::English, mnemonic.as_str()).is_ok());

        // 两次生成必须不同
        let other = WalletService::generate_mnemonic().unwrap();
        assert_ne!(mnemonic.as_str(), other.as_str());
    }
}
