// 价格服务
//
// 入账换算的唯一定价来源：内存缓存 → 数据库 → CoinGecko，
// 5 分钟有效期。价格拿不到时入账失败并重试，绝不使用陈价入账。

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

/// 价格缓存有效期（秒）
const PRICE_TTL_SECS: i64 = 300;

/// 价格数据结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub symbol: String,
    pub price_usdt: Decimal,
    pub source: String,
    pub last_updated: DateTime<Utc>,
}

/// CoinGecko API 响应
#[derive(Debug, Deserialize)]
struct CoinGeckoResponse {
    #[serde(flatten)]
    prices: HashMap<String, CoinGeckoCoin>,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoCoin {
    usd: f64,
}

/// 价格服务
pub struct PriceService {
    pool: PgPool,
    cache: Arc<RwLock<HashMap<String, Price>>>,
    client: reqwest::Client,
}

impl PriceService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::new(),
        }
    }

    /// 获取单个币种价格（USDT），内部使用 Decimal 保证精度
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        // 1. 先查内存缓存
        {
            let cache = self.cache.read().await;
            if let Some(price) = cache.get(&symbol.to_uppercase()) {
                let age = Utc::now() - price.last_updated;
                if age.num_seconds() < PRICE_TTL_SECS {
                    return Ok(price.price_usdt);
                }
            }
        }

        // 2. 查数据库
        let db_price = sqlx::query_as::<_, (String, Decimal, String, DateTime<Utc>)>(
            "SELECT symbol, price_usdt, source, last_updated FROM prices WHERE symbol = $1 ORDER BY last_updated DESC LIMIT 1"
        )
        .bind(symbol.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((sym, price, source, updated)) = db_price {
            let age = Utc::now() - updated;
            if age.num_seconds() < PRICE_TTL_SECS {
                self.update_cache(sym, price, source, updated).await;
                return Ok(price);
            }
        }

        // 3. 从 CoinGecko 获取最新价格
        self.fetch_and_update_price(symbol).await
    }

    /// 从 CoinGecko 获取价格并更新缓存与数据库
    async fn fetch_and_update_price(&self, symbol: &str) -> Result<Decimal> {
        let coin_id = self.symbol_to_coingecko_id(symbol);

        let url = format!(
            "https://api.coingecko.com/api/v3/simple/price?ids={}&vs_currencies=usd",
            coin_id
        );

        tracing::info!(symbol = %symbol, "Fetching price from CoinGecko");

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "VaultCore/1.0")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to fetch price from CoinGecko")?;

        if !response.status().is_success() {
            anyhow::bail!("CoinGecko API error: {}", response.status());
        }

        let data: CoinGeckoResponse = response
            .json()
            .await
            .context("Failed to parse CoinGecko response")?;

        let price_f64 = data
            .prices
            .get(&coin_id)
            .ok_or_else(|| anyhow::anyhow!("Price not found for {}", coin_id))?
            .usd;

        let price = Decimal::from_f64_retain(price_f64)
            .ok_or_else(|| anyhow::anyhow!("Invalid price value: {}", price_f64))?;

        sqlx::query(
            "INSERT INTO prices (symbol, price_usdt, source, last_updated)
             VALUES ($1, $2, 'coingecko', CURRENT_TIMESTAMP)
             ON CONFLICT (symbol, source)
             DO UPDATE SET price_usdt = EXCLUDED.price_usdt, last_updated = CURRENT_TIMESTAMP",
        )
        .bind(symbol.to_uppercase())
        .bind(price)
        .execute(&self.pool)
        .await
        .context("Failed to update price in database")?;

        self.update_cache(
            symbol.to_string(),
            price,
            "coingecko".to_string(),
            Utc::now(),
        )
        .await;

        Ok(price)
    }

    /// 符号转 CoinGecko ID
    fn symbol_to_coingecko_id(&self, symbol: &str) -> String {
        match symbol.to_lowercase().as_str() {
            "eth" => "ethereum",
            "btc" => "bitcoin",
            "sol" => "solana",
            "bnb" => "binancecoin",
            "matic" => "matic-network",
            _ => symbol,
        }
        .to_string()
    }

    /// 更新内存缓存
    async fn update_cache(
        &self,
        symbol: String,
        price: Decimal,
        source: String,
        updated: DateTime<Utc>,
    ) {
        let mut cache = self.cache.write().await;
        cache.insert(
            symbol.to_uppercase(),
            Price {
                symbol: symbol.to_uppercase(),
                price_usdt: price,
                source,
                last_updated: updated,
            },
        );
    }

    /// 后台任务：定时刷新所有支持币种的价格
    pub async fn start_price_updater(self: Arc<Self>) {
        let supported_symbols = vec!["ETH", "BNB", "MATIC", "SOL", "BTC"];

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));

            loop {
                interval.tick().await;

                for symbol in &supported_symbols {
                    match self.fetch_and_update_price(symbol).await {
                        Ok(price) => {
                            tracing::info!(symbol = %symbol, price = %price, "Price updated");
                        }
                        Err(e) => {
                            tracing::error!(symbol = %symbol, error = %e, "Price update failed");
                        }
                    }

                    // 避免触发 API 限流
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires database connection"]
    fn test_symbol_to_coingecko_id() {
        let pool = PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let service = PriceService::new(pool);

        assert_eq!(service.symbol_to_coingecko_id("ETH"), "ethereum");
        assert_eq!(service.symbol_to_coingecko_id("SOL"), "solana");
        assert_eq!(service.symbol_to_coingecko_id("BTC"), "bitcoin");
    }
}
