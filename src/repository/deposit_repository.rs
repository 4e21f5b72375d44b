// 充值记录数据访问 Repository
//
// 充值检测的至多一次语义在这里落地：余额 CAS 与充值行插入
// 在同一个数据库事务内完成，两个竞争的轮询周期只有一个能赢。

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Deposit, DepositStatus};

/// 新充值入库参数
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub address_id: Uuid,
    pub chain: String,
    pub asset: String,
    pub intended_amount: Option<Decimal>,
    /// 链上实际发现的增量
    pub crypto_amount: Decimal,
    /// 检测时的地址余额旧值（CAS 期望值）
    pub observed_old_balance: Decimal,
    /// 检测时的地址余额新值
    pub observed_new_balance: Decimal,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct DepositRepository {
    pool: PgPool,
}

impl DepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 记录一笔已检测的充值
    ///
    /// 单事务内完成：
    ///   1. wallet_addresses.balance 按旧值 CAS 更新到新值
    ///   2. 插入 processing 状态的充值行
    ///   3. 标记地址已使用
    /// CAS 未命中（另一周期已处理）返回 Ok(None)，不产生任何写入。
    pub async fn record_detected(&self, new_deposit: NewDeposit) -> Result<Option<Deposit>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin deposit transaction")?;

        let cas = sqlx::query(
            r#"
            UPDATE wallet_addresses
            SET balance = $3, is_used = true, last_synced_at = $4
            WHERE id = $1 AND balance = $2
            "#,
        )
        .bind(new_deposit.address_id)
        .bind(new_deposit.observed_old_balance)
        .bind(new_deposit.observed_new_balance)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("Failed to CAS address balance")?;

        if cas.rows_affected() == 0 {
            tx.rollback()
                .await
                .context("Failed to rollback deposit transaction")?;
            return Ok(None);
        }

        let deposit = sqlx::query_as::<_, Deposit>(
            r#"
            INSERT INTO deposits
                (user_id, account_id, address_id, chain, asset,
                 intended_amount, crypto_amount, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(new_deposit.user_id)
        .bind(new_deposit.account_id)
        .bind(new_deposit.address_id)
        .bind(&new_deposit.chain)
        .bind(&new_deposit.asset)
        .bind(new_deposit.intended_amount)
        .bind(new_deposit.crypto_amount)
        .bind(DepositStatus::Processing.as_str())
        .bind(&new_deposit.metadata)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert deposit")?;

        tx.commit()
            .await
            .context("Failed to commit deposit transaction")?;

        Ok(Some(deposit))
    }

    pub async fn find_by_id(&self, deposit_id: Uuid) -> Result<Option<Deposit>> {
        let deposit = sqlx::query_as::<_, Deposit>("SELECT * FROM deposits WHERE id = $1")
            .bind(deposit_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query deposit")?;
        Ok(deposit)
    }

    /// 入账成功，进入终态
    pub async fn mark_completed(
        &self,
        deposit_id: Uuid,
        usd_value: Decimal,
        metadata_patch: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deposits
            SET status = $2, usd_value = $3,
                metadata = metadata || $4,
                completed_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(deposit_id)
        .bind(DepositStatus::Completed.as_str())
        .bind(usd_value)
        .bind(&metadata_patch)
        .execute(&self.pool)
        .await
        .context("Failed to mark deposit completed")?;
        Ok(())
    }

    pub async fn mark_failed(&self, deposit_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deposits
            SET status = $2,
                metadata = metadata || jsonb_build_object('failure_reason', $3::text)
            WHERE id = $1
            "#,
        )
        .bind(deposit_id)
        .bind(DepositStatus::Failed.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .context("Failed to mark deposit failed")?;
        Ok(())
    }

    /// 终态后的 metadata 批注（如归集结果），不改动其他字段
    pub async fn annotate(&self, deposit_id: Uuid, patch: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE deposits SET metadata = metadata || $2 WHERE id = $1")
            .bind(deposit_id)
            .bind(&patch)
            .execute(&self.pool)
            .await
            .context("Failed to annotate deposit metadata")?;
        Ok(())
    }

    pub async fn list_by_account(&self, account_id: Uuid, limit: i64) -> Result<Vec<Deposit>> {
        let deposits = sqlx::query_as::<_, Deposit>(
            "SELECT * FROM deposits WHERE account_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list deposits")?;
        Ok(deposits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::wallet_repository::{NewAddress, WalletRepository};

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/vaultcore_test".to_string());
        PgPool::connect(&url).await.expect("connect test database")
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_detected_deposit_cas_once() {
        let pool = test_pool().await;
        let wallets = WalletRepository::new(pool.clone());
        let deposits = DepositRepository::new(pool);

        let wallet = wallets.create_wallet(Uuid::new_v4(), "feed").await.unwrap();
        let address = wallets
            .insert_address_with_index(
                NewAddress {
                    wallet_id: wallet.id,
                    chain: "eth".to_string(),
                    address: format!("0xdep{}", Uuid::new_v4()),
                    address_index: 0,
                    derivation_path: "m/44'/60'/0'/0/0".to_string(),
                    asset: None,
                },
                -1,
            )
            .await
            .unwrap()
            .unwrap();

        let new_deposit = NewDeposit {
            user_id: Uuid::new_v4(),
            account_id: wallet.account_id,
            address_id: address.id,
            chain: "eth".to_string(),
            asset: "ETH".to_string(),
            intended_amount: None,
            crypto_amount: Decimal::new(5, 1), // 0.5
            observed_old_balance: Decimal::ZERO,
            observed_new_balance: Decimal::new(5, 1),
            metadata: serde_json::json!({}),
        };

        // 第一次命中 CAS，产生充值行
        let first = deposits.record_detected(new_deposit.clone()).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().status, "processing");

        // 同一增量重放（旧值已过期）必须静默跳过
        let second = deposits.record_detected(new_deposit.clone()).await.unwrap();
        assert!(second.is_none());

        // 账户流水只包含唯一的一笔充值
        let listed = deposits
            .list_by_account(new_deposit.account_id, 50)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
