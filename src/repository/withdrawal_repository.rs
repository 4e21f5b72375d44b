// 提现记录数据访问 Repository

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Withdrawal, WithdrawalStatus};

/// 新提现入库参数
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub chain: String,
    pub asset: String,
    pub destination: String,
    pub requested_amount: Decimal,
    pub platform_fee: Decimal,
}

#[derive(Clone)]
pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new_withdrawal: NewWithdrawal) -> Result<Withdrawal> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals
                (user_id, account_id, chain, asset, destination,
                 requested_amount, platform_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(new_withdrawal.user_id)
        .bind(new_withdrawal.account_id)
        .bind(&new_withdrawal.chain)
        .bind(&new_withdrawal.asset)
        .bind(&new_withdrawal.destination)
        .bind(new_withdrawal.requested_amount)
        .bind(new_withdrawal.platform_fee)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert withdrawal")?;

        Ok(withdrawal)
    }

    pub async fn find_by_id(&self, withdrawal_id: Uuid) -> Result<Option<Withdrawal>> {
        let withdrawal =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
                .bind(withdrawal_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query withdrawal")?;
        Ok(withdrawal)
    }

    pub async fn set_status(&self, withdrawal_id: Uuid, status: WithdrawalStatus) -> Result<()> {
        sqlx::query(
            "UPDATE withdrawals SET status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(withdrawal_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update withdrawal status")?;
        Ok(())
    }

    /// 广播成功后记录交易哈希与实际网络费
    pub async fn mark_sent(
        &self,
        withdrawal_id: Uuid,
        tx_hash: &str,
        network_fee: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = $2, tx_hash = $3, network_fee = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(withdrawal_id)
        .bind(WithdrawalStatus::Sent.as_str())
        .bind(tx_hash)
        .bind(network_fee)
        .execute(&self.pool)
        .await
        .context("Failed to mark withdrawal sent")?;
        Ok(())
    }

    /// 链上确认后进入终态并落实际到账金额
    pub async fn mark_completed(
        &self,
        withdrawal_id: Uuid,
        final_amount: Decimal,
        network_fee: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = $2, final_amount = $3, network_fee = COALESCE($4, network_fee),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(withdrawal_id)
        .bind(WithdrawalStatus::Completed.as_str())
        .bind(final_amount)
        .bind(network_fee)
        .execute(&self.pool)
        .await
        .context("Failed to mark withdrawal completed")?;
        Ok(())
    }

    pub async fn mark_failed(&self, withdrawal_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = $2,
                approval_metadata = approval_metadata || jsonb_build_object('failure_reason', $3::text),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(withdrawal_id)
        .bind(WithdrawalStatus::Failed.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .context("Failed to mark withdrawal failed")?;
        Ok(())
    }

    pub async fn list_by_account(&self, account_id: Uuid, limit: i64) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            "SELECT * FROM withdrawals WHERE account_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list withdrawals")?;
        Ok(withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/vaultcore_test".to_string());
        PgPool::connect(&url).await.expect("connect test database")
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_withdrawal_lifecycle() {
        let repo = WithdrawalRepository::new(test_pool().await);

        let withdrawal = repo
            .create(NewWithdrawal {
                user_id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                chain: "eth".to_string(),
                asset: "ETH".to_string(),
                destination: "0x0000000000000000000000000000000000000002".to_string(),
                requested_amount: Decimal::new(1, 0),
                platform_fee: Decimal::new(5, 3),
            })
            .await
            .unwrap();
        assert_eq!(withdrawal.status, "pending");

        repo.mark_sent(withdrawal.id, "0xabc", Some(Decimal::new(21, 4)))
            .await
            .unwrap();
        let sent = repo.find_by_id(withdrawal.id).await.unwrap().unwrap();
        assert_eq!(sent.status, "sent");
        assert_eq!(sent.tx_hash.as_deref(), Some("0xabc"));

        // 账户流水可回查
        let listed = repo.list_by_account(withdrawal.account_id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, withdrawal.id);
    }
}
