// 账本（accounts 表）数据访问 Repository
//
// 清算流程的入账出口。列名只允许来自 BalanceField 白名单，
// SQL 拼接不接受任何外部输入。

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::BalanceField;

/// 账户余额快照
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountBalances {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub invested_balance: Decimal,
    pub crypto_balance: Decimal,
}

#[derive(Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 确保账户行存在（幂等）
    pub async fn ensure_account(&self, account_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to ensure account row")?;
        Ok(())
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountBalances>> {
        let account = sqlx::query_as::<_, AccountBalances>(
            "SELECT id, user_id, total_balance, available_balance, invested_balance, crypto_balance FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query account")?;
        Ok(account)
    }

    /// 原子增加指定余额字段
    pub async fn credit(
        &self,
        account_id: Uuid,
        field: BalanceField,
        amount: Decimal,
    ) -> Result<()> {
        if amount < Decimal::ZERO {
            anyhow::bail!("credit amount must be non-negative");
        }
        let column = field.column();
        let sql = format!(
            "UPDATE accounts SET {col} = {col} + $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
            col = column
        );
        let result = sqlx::query(&sql)
            .bind(account_id)
            .bind(amount)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to credit account field {}", column))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Account not found for credit: {}", account_id);
        }
        Ok(())
    }

    /// 原子减少指定余额字段，余额不足时不改动并返回 false
    pub async fn debit(
        &self,
        account_id: Uuid,
        field: BalanceField,
        amount: Decimal,
    ) -> Result<bool> {
        if amount < Decimal::ZERO {
            anyhow::bail!("debit amount must be non-negative");
        }
        let column = field.column();
        let sql = format!(
            "UPDATE accounts SET {col} = {col} - $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1 AND {col} >= $2",
            col = column
        );
        let result = sqlx::query(&sql)
            .bind(account_id)
            .bind(amount)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to debit account field {}", column))?;

        Ok(result.rows_affected() == 1)
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
    async fn test_credit_debit_roundtrip() {
        let ledger = LedgerRepository::new(test_pool().await);
        let account_id = Uuid::new_v4();
        ledger.ensure_account(account_id, Uuid::new_v4()).await.unwrap();

        ledger
            .credit(account_id, BalanceField::Available, Decimal::new(100, 0))
            .await
            .unwrap();

        // 余额充足的扣减成功
        assert!(ledger
            .debit(account_id, BalanceField::Available, Decimal::new(40, 0))
            .await
            .unwrap());
        // 超额扣减被拒绝且不改动余额
        assert!(!ledger
            .debit(account_id, BalanceField::Available, Decimal::new(61, 0))
            .await
            .unwrap());

        let account = ledger.get_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.available_balance, Decimal::new(60, 0));
    }
}
