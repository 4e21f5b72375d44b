// HD 钱包与充值地址数据访问 Repository

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{HdWallet, WalletAddress};

/// 新地址入库参数
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub wallet_id: Uuid,
    pub chain: String,
    pub address: String,
    pub address_index: i64,
    pub derivation_path: String,
    pub asset: Option<String>,
}

#[derive(Clone)]
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建 HD 钱包
    ///
    /// account_id 上的唯一约束保证每个账户至多一个钱包；
    /// 冲突以数据库错误形式向上传播，由调用方识别。
    pub async fn create_wallet(&self, account_id: Uuid, encrypted_seed: &str) -> Result<HdWallet> {
        let wallet = sqlx::query_as::<_, HdWallet>(
            r#"
            INSERT INTO hd_wallets (account_id, encrypted_seed)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(encrypted_seed)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert hd_wallet")?;

        Ok(wallet)
    }

    pub async fn find_by_id(&self, wallet_id: Uuid) -> Result<Option<HdWallet>> {
        let wallet = sqlx::query_as::<_, HdWallet>("SELECT * FROM hd_wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query hd_wallet by id")?;
        Ok(wallet)
    }

    pub async fn find_by_account(&self, account_id: Uuid) -> Result<Option<HdWallet>> {
        let wallet =
            sqlx::query_as::<_, HdWallet>("SELECT * FROM hd_wallets WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query hd_wallet by account")?;
        Ok(wallet)
    }

    /// 锁定/解锁钱包（锁定期间拒绝地址分配与归集）
    pub async fn set_locked(&self, wallet_id: Uuid, locked: bool) -> Result<()> {
        sqlx::query(
            "UPDATE hd_wallets SET is_locked = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(wallet_id)
        .bind(locked)
        .execute(&self.pool)
        .await
        .context("Failed to update wallet lock state")?;
        Ok(())
    }

    /// 标记钱包派生自检通过
    pub async fn mark_verified(&self, wallet_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE hd_wallets SET verified_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(wallet_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark wallet verified")?;
        Ok(())
    }

    /// 地址落库 + 索引推进（同一事务）
    ///
    /// 先插入地址行，再按调用方读到的旧索引 CAS 推进计数器；CAS
    /// 未命中整体回滚，索引不会被烧掉、地址不会丢。并发分配撞上
    /// (wallet, chain, index) 唯一约束同样视为抢先，返回 Ok(None)
    /// 让调用方重读重派生。
    pub async fn insert_address_with_index(
        &self,
        new_address: NewAddress,
        expected_last: i64,
    ) -> Result<Option<WalletAddress>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin address allocation transaction")?;

        let inserted = sqlx::query_as::<_, WalletAddress>(
            r#"
            INSERT INTO wallet_addresses
                (wallet_id, chain, address, address_index, derivation_path, asset)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new_address.wallet_id)
        .bind(&new_address.chain)
        .bind(&new_address.address)
        .bind(new_address.address_index)
        .bind(&new_address.derivation_path)
        .bind(&new_address.asset)
        .fetch_one(&mut *tx)
        .await;

        let address = match inserted {
            Ok(address) => address,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => {
                tx.rollback()
                    .await
                    .context("Failed to rollback address allocation")?;
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to insert wallet address"),
        };

        let advanced = sqlx::query(
            r#"
            UPDATE hd_wallets
            SET last_address_index = $3, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND last_address_index = $2
            "#,
        )
        .bind(new_address.wallet_id)
        .bind(expected_last)
        .bind(new_address.address_index)
        .execute(&mut *tx)
        .await
        .context("Failed to advance address index")?;

        if advanced.rows_affected() != 1 {
            tx.rollback()
                .await
                .context("Failed to rollback address allocation")?;
            return Ok(None);
        }

        tx.commit()
            .await
            .context("Failed to commit address allocation")?;
        Ok(Some(address))
    }

    /// 查找该钱包/链下最新的未使用地址（可直接复用，不必派生新索引）
    pub async fn find_unused_address(
        &self,
        wallet_id: Uuid,
        chain: &str,
    ) -> Result<Option<WalletAddress>> {
        let address = sqlx::query_as::<_, WalletAddress>(
            r#"
            SELECT * FROM wallet_addresses
            WHERE wallet_id = $1 AND chain = $2 AND is_used = false
            ORDER BY address_index DESC
            LIMIT 1
            "#,
        )
        .bind(wallet_id)
        .bind(chain)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query unused address")?;
        Ok(address)
    }

    pub async fn list_addresses(&self, wallet_id: Uuid) -> Result<Vec<WalletAddress>> {
        let addresses = sqlx::query_as::<_, WalletAddress>(
            "SELECT * FROM wallet_addresses WHERE wallet_id = $1 ORDER BY chain, address_index",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list wallet addresses")?;
        Ok(addresses)
    }

    /// 充值监控的巡检集合：活跃且未锁定钱包在该链的全部地址
    pub async fn list_watch_addresses(&self, chain: &str) -> Result<Vec<WalletAddress>> {
        let addresses = sqlx::query_as::<_, WalletAddress>(
            r#"
            SELECT a.* FROM wallet_addresses a
            JOIN hd_wallets w ON w.id = a.wallet_id
            WHERE a.chain = $1 AND w.is_active = true AND w.is_locked = false
            ORDER BY a.created_at
            "#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list watch addresses")?;
        Ok(addresses)
    }

    /// 归集/提现完成后回写链上确认余额（非 CAS 路径）
    pub async fn set_address_balance(&self, address_id: Uuid, balance: Decimal) -> Result<()> {
        sqlx::query(
            "UPDATE wallet_addresses SET balance = $2, last_synced_at = $3 WHERE id = $1",
        )
        .bind(address_id)
        .bind(balance)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to set address balance")?;
        Ok(())
    }

    /// 余额无变化时仅刷新巡检时间戳
    pub async fn touch_address_synced(&self, address_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE wallet_addresses SET last_synced_at = $2 WHERE id = $1")
            .bind(address_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("Failed to touch address sync time")?;
        Ok(())
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

    fn new_address(wallet_id: Uuid, index: i64) -> NewAddress {
        NewAddress {
            wallet_id,
            chain: "eth".to_string(),
            address: format!("0xtest{}", Uuid::new_v4()),
            address_index: index,
            derivation_path: format!("m/44'/60'/0'/0/{}", index),
            asset: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_address_allocation_is_transactional() {
        let repo = WalletRepository::new(test_pool().await);
        let account_id = Uuid::new_v4();

        let wallet = repo.create_wallet(account_id, "deadbeef").await.unwrap();
        assert_eq!(wallet.last_address_index, -1);
        assert!(wallet.is_operable());

        // 首次分配：地址落库且索引推进
        let first = repo
            .insert_address_with_index(new_address(wallet.id, 0), -1)
            .await
            .unwrap();
        assert!(first.is_some());
        let advanced = repo.find_by_id(wallet.id).await.unwrap().unwrap();
        assert_eq!(advanced.last_address_index, 0);

        // 旧索引重放（并发分配语义）：不落库、不推进
        let stale = repo
            .insert_address_with_index(new_address(wallet.id, 1), -1)
            .await
            .unwrap();
        assert!(stale.is_none());
        let unchanged = repo.find_by_id(wallet.id).await.unwrap().unwrap();
        assert_eq!(unchanged.last_address_index, 0);
        assert_eq!(repo.list_addresses(wallet.id).await.unwrap().len(), 1);

        // 重读后的正确索引继续推进
        let second = repo
            .insert_address_with_index(new_address(wallet.id, 1), 0)
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_address_uniqueness_treated_as_lost_race() {
        let repo = WalletRepository::new(test_pool().await);
        let wallet = repo.create_wallet(Uuid::new_v4(), "cafe").await.unwrap();

        let address = new_address(wallet.id, 0);
        assert!(repo
            .insert_address_with_index(address.clone(), -1)
            .await
            .unwrap()
            .is_some());

        // 同 (wallet, chain, index) 重复入库按抢先处理，不报错
        let mut duplicate = address;
        duplicate.address = format!("0xtest{}", Uuid::new_v4());
        assert!(repo
            .insert_address_with_index(duplicate, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore = "requires database connection"]
    async fn test_lock_excludes_wallet_from_operations() {
        let repo = WalletRepository::new(test_pool().await);
        let wallet = repo.create_wallet(Uuid::new_v4(), "beef").await.unwrap();
        repo.insert_address_with_index(new_address(wallet.id, 0), -1)
            .await
            .unwrap();

        repo.set_locked(wallet.id, true).await.unwrap();
        let locked = repo.find_by_id(wallet.id).await.unwrap().unwrap();
        assert!(locked.is_locked);
        assert!(!locked.is_operable());

        // 锁定钱包的地址不进入充值巡检集合
        let watched = repo.list_watch_addresses("eth").await.unwrap();
        assert!(!watched.iter().any(|a| a.wallet_id == wallet.id));

        repo.set_locked(wallet.id, false).await.unwrap();
        let unlocked = repo.find_by_id(wallet.id).await.unwrap().unwrap();
        assert!(unlocked.is_operable());
    }
}
