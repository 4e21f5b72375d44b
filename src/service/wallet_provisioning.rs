// 钱包开通任务
//
// 账户创建后异步执行：建种子、每条链派生首个地址、自检、激活。
// 有界重试（默认 3 次，退避 30s/2m/5m），每一步幂等，重试不会
// 生成第二个种子或重复索引。重试耗尽只升级一次管理员告警。

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::Duration;
use uuid::Uuid;

use crate::{
    config::ProvisioningConfig,
    domain::HdWallet,
    metrics,
    service::{
        notification_service::{NotificationCategory, NotificationService},
        wallet_service::WalletService,
    },
};

pub struct WalletProvisioning {
    service: WalletService,
    notifications: NotificationService,
    config: ProvisioningConfig,
}

impl WalletProvisioning {
    pub fn new(
        service: WalletService,
        notifications: NotificationService,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            service,
            notifications,
            config,
        }
    }

    /// 异步调度一次开通（API 返回后执行）
    pub fn spawn(self: Arc<Self>, account_id: Uuid, user_id: Uuid) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.provision(account_id, user_id).await {
                tracing::error!(
                    account_id = %account_id,
                    error = %e,
                    "Wallet provisioning gave up"
                );
            }
        })
    }

    /// 带重试的完整开通流程
    pub async fn provision(&self, account_id: Uuid, user_id: Uuid) -> Result<HdWallet> {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=self.config.max_attempts {
            match self.attempt(account_id, user_id).await {
                Ok(wallet) => {
                    metrics::count_provisioning_success();
                    tracing::info!(
                        account_id = %account_id,
                        wallet_id = %wallet.id,
                        attempt,
                        "Wallet provisioned"
                    );
                    self.notifications
                        .notify_best_effort(
                            Some(user_id),
                            NotificationCategory::WalletCreated,
                            "钱包已开通",
                            json!({"wallet_id": wallet.id, "account_id": account_id}),
                        )
                        .await;
                    return Ok(wallet);
                }
                Err(e) => {
                    tracing::warn!(
                        account_id = %account_id,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %format!("{:#}", e),
                        "Provisioning attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                    }
                }
            }
        }

        // 重试耗尽：恰好一次管理员告警 + 一次用户延迟通知
        metrics::count_provisioning_exhausted();
        let reason = last_error
            .as_ref()
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "unknown".to_string());

        self.notifications
            .notify_best_effort(
                None,
                NotificationCategory::AdminAlert,
                "钱包开通重试耗尽",
                json!({
                    "account_id": account_id,
                    "user_id": user_id,
                    "attempts": self.config.max_attempts,
                    "last_error": reason,
                }),
            )
            .await;
        self.notifications
            .notify_best_effort(
                Some(user_id),
                NotificationCategory::WalletCreationDelayed,
                "钱包开通延迟",
                json!({"account_id": account_id}),
            )
            .await;

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Provisioning failed")))
            .context("Wallet provisioning exhausted retries")
    }

    /// 第 n 次失败后的退避间隔，超出配置长度复用最后一项
    fn backoff_for(&self, attempt: u32) -> Duration {
        let secs = self
            .config
            .backoff_secs
            .get((attempt - 1) as usize)
            .or(self.config.backoff_secs.last())
            .copied()
            .unwrap_or(0);
        Duration::from_secs(secs)
    }

    /// 单次开通尝试（每一步可安全重入）
    async fn attempt(&self, account_id: Uuid, user_id: Uuid) -> Result<HdWallet> {
        let wallet = self.service.create_wallet(account_id, user_id).await?;

        let chain_keys: Vec<String> = self
            .service
            .registry()
            .list_all()
            .iter()
            .map(|d| d.chain_key.clone())
            .collect();

        for chain in &chain_keys {
            self.service
                .allocate_address(wallet.id, chain)
                .await
                .with_context(|| format!("Failed to allocate first {} address", chain))?;
        }

        self.service.verify_wallet(&wallet).await?;

        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = ProvisioningConfig {
            max_attempts: 5,
            backoff_secs: vec![30, 120, 300],
        };

        // 通过纯函数验证退避表（完整流程需要数据库）
        let backoff = |attempt: u32| {
            config
                .backoff_secs
                .get((attempt - 1) as usize)
                .or(config.backoff_secs.last())
                .copied()
                .unwrap_or(0)
        };

        assert_eq!(backoff(1), 30);
        assert_eq!(backoff(2), 120);
        assert_eq!(backoff(3), 300);
        // 超出表长复用最后一项
        assert_eq!(backoff(4), 300);
    }
}
