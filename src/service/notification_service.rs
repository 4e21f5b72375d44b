// 通知服务
//
// 所有面向用户/管理员的事件统一落 notifications 表，由外部投递
// 渠道消费。通知失败只记日志，永远不阻断清算主流程。

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// 通知类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    DepositConfirmed,
    DepositMismatch,
    WalletCreated,
    WalletCreationDelayed,
    AdminAlert,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::DepositConfirmed => "deposit_confirmed",
            NotificationCategory::DepositMismatch => "deposit_mismatch",
            NotificationCategory::WalletCreated => "wallet_created",
            NotificationCategory::WalletCreationDelayed => "wallet_creation_delayed",
            NotificationCategory::AdminAlert => "admin_alert",
        }
    }

    fn severity(&self) -> &'static str {
        match self {
            NotificationCategory::AdminAlert => "critical",
            NotificationCategory::DepositMismatch | NotificationCategory::WalletCreationDelayed => {
                "warning"
            }
            _ => "info",
        }
    }
}

#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 发送用户通知（user_id 为 None 时为管理员广播）
    pub async fn notify(
        &self,
        user_id: Option<Uuid>,
        category: NotificationCategory,
        title: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, category, severity, title, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(category.as_str())
        .bind(category.severity())
        .bind(title)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .context("Failed to insert notification")?;

        tracing::debug!(
            category = category.as_str(),
            user_id = ?user_id,
            "Notification queued"
        );
        Ok(())
    }

    /// 尽力而为版本：失败只记警告
    pub async fn notify_best_effort(
        &self,
        user_id: Option<Uuid>,
        category: NotificationCategory,
        title: &str,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self.notify(user_id, category, title, payload).await {
            tracing::warn!(
                category = category.as_str(),
                error = %e,
                "Failed to queue notification"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_severity() {
        assert_eq!(NotificationCategory::AdminAlert.severity(), "critical");
        assert_eq!(NotificationCategory::DepositMismatch.severity(), "warning");
        assert_eq!(NotificationCategory::DepositConfirmed.severity(), "info");
    }
}
