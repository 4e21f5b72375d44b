//! 数据库连接池

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

pub use sqlx::PgPool;

use crate::config::DatabaseConfig;

/// 按配置建立 Postgres 连接池
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}
